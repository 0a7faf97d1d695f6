mod common;

use proptest::prelude::*;
use toxide_core::limits::{MAX_NAME_LENGTH, MAX_STATUS_MESSAGE_LENGTH};
use toxide_core::{Network, SetInfoError, Tox};

fn tox() -> Tox {
    Tox::with_network(common::quiet(), &Network::new()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn name_within_limit_round_trips(name in "[ -~]{0,128}") {
        let mut tox = tox();
        tox.self_set_name(&name).unwrap();
        prop_assert_eq!(tox.self_name().unwrap(), name.clone());
        prop_assert_eq!(tox.self_name_size().unwrap(), name.len());
    }

    #[test]
    fn oversized_name_keeps_old_value(old in "[a-z]{1,16}", extra in 1usize..64) {
        let mut tox = tox();
        tox.self_set_name(&old).unwrap();
        let long = "n".repeat(MAX_NAME_LENGTH + extra);
        prop_assert_eq!(
            tox.self_set_name(&long),
            Err(SetInfoError::TooLong { max: MAX_NAME_LENGTH, actual: long.len() })
        );
        prop_assert_eq!(tox.self_name().unwrap(), old);
    }

    #[test]
    fn status_message_within_limit_round_trips(message in "[ -~]{0,1007}") {
        let mut tox = tox();
        tox.self_set_status_message(&message).unwrap();
        prop_assert_eq!(tox.self_status_message().unwrap(), message.clone());
        prop_assert_eq!(tox.self_status_message_size().unwrap(), message.len());
    }

    #[test]
    fn oversized_status_message_keeps_old_value(old in "[a-z]{0,16}") {
        let mut tox = tox();
        tox.self_set_status_message(&old).unwrap();
        let long = "s".repeat(MAX_STATUS_MESSAGE_LENGTH + 1);
        prop_assert!(tox.self_set_status_message(&long).is_err());
        prop_assert_eq!(tox.self_status_message().unwrap(), old);
    }

    #[test]
    fn multibyte_names_are_limited_in_bytes(ch in prop::char::range('\u{80}', '\u{7ff}')) {
        let mut tox = tox();
        // Two bytes per char.
        let fits: String = std::iter::repeat(ch).take(MAX_NAME_LENGTH / 2).collect();
        tox.self_set_name(&fits).unwrap();
        let over = format!("{fits}{ch}");
        prop_assert!(tox.self_set_name(&over).is_err());
        prop_assert_eq!(tox.self_name().unwrap(), fits);
    }
}
