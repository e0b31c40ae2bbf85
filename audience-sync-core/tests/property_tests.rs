/// Property-based tests using proptest
/// Invariants of audience naming, table selection and record extraction
use audience_sync_core::contract::Row;
use audience_sync_core::select::{derive_audience_name, qualifies, MIN_AUDIENCE_ROWS};
use audience_sync_core::users::user_record_from_row;
use proptest::prelude::*;

// Property: naming is a pure function of the table id
proptest! {
    #[test]
    fn derived_name_is_deterministic(table_id in "[A-Za-z0-9_]{0,64}") {
        prop_assert_eq!(derive_audience_name(&table_id), derive_audience_name(&table_id));
    }

    #[test]
    fn derived_name_has_suffix_and_no_underscores(table_id in "[a-z0-9_]{1,64}") {
        let name = derive_audience_name(&table_id);
        prop_assert!(name.ends_with(" O2O"));
        prop_assert!(!name.contains('_'));
        prop_assert_eq!(name.clone(), name.to_uppercase());
    }

    #[test]
    fn ids_without_keywords_only_change_case_and_separators(table_id in "[abdfghijkmopqrsuwxyz0-9_]{1,40}") {
        // No 'c', 'e', 'l', 'n', 't', 'v': none of the keywords can appear.
        let expected = format!("{} O2O", table_id.replace('_', " ").to_uppercase());
        prop_assert_eq!(derive_audience_name(&table_id), expected);
    }
}

// Property: selection threshold
proptest! {
    #[test]
    fn table_qualifies_iff_row_count_reaches_threshold(row_count in 0u64..5_000) {
        prop_assert_eq!(qualifies(row_count, MIN_AUDIENCE_ROWS), row_count >= 1000);
    }
}

// Property: record extraction preserves values in schema order
proptest! {
    #[test]
    fn record_values_follow_schema_order(
        first in proptest::option::of("[A-Za-z]{1,12}"),
        email in proptest::option::of("[a-z]{1,8}@[a-z]{1,8}\\.com"),
        last in proptest::option::of("[A-Za-z]{1,12}"),
        phone in proptest::option::of("\\+[0-9]{8,14}"),
    ) {
        let row = Row::new()
            .with("phone", phone.as_deref())
            .with("mailing_address_last_name", last.as_deref())
            .with("email", email.as_deref())
            .with("mailing_address_first_name", first.as_deref());

        let record = user_record_from_row(&row, "t").unwrap();

        prop_assert_eq!(
            record.values(),
            [first.as_deref(), email.as_deref(), last.as_deref(), phone.as_deref()]
        );
    }
}
