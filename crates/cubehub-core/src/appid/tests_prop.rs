//! Property tests for `AppId` normalisation.

use proptest::prelude::*;

use super::{AppId, Status, HEAD};

fn part() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_.-]{0,12}"
}

fn version() -> impl Strategy<Value = String> {
    (0u8..100, 0u8..100, 0u8..100).prop_map(|(a, b, c)| format!("{a}.{b}.{c}"))
}

proptest! {
    #[test]
    fn case_folding_preserves_equality(tenant in part(), app in part(), ver in version(), branch in part()) {
        let lower = AppId::new(
            tenant.to_lowercase(),
            app.to_lowercase(),
            ver.clone(),
            Status::Snapshot,
            branch.to_lowercase(),
        ).unwrap();
        let upper = AppId::new(
            tenant.to_uppercase(),
            app.to_uppercase(),
            ver,
            Status::Snapshot,
            branch.to_uppercase(),
        ).unwrap();
        prop_assert_eq!(&lower, &upper);
        prop_assert_eq!(lower.cache_key(), upper.cache_key());
    }

    #[test]
    fn derivations_round_trip(tenant in part(), app in part(), ver in version(), branch in part()) {
        let id = AppId::new(tenant, app, ver.clone(), Status::Snapshot, branch).unwrap();
        prop_assert!(id.as_head().is_head());
        prop_assert!(id.as_release().is_release());
        prop_assert_eq!(id.as_release().as_snapshot(), id.clone());
        prop_assert_eq!(id.as_branch(HEAD).as_branch(id.branch()), id.clone());
        prop_assert_eq!(id.as_version("9.9.9").as_version(ver), id);
    }

    #[test]
    fn cache_key_starts_with_branch_agnostic_key(tenant in part(), app in part(), ver in version(), branch in part()) {
        let id = AppId::new(tenant, app, ver, Status::Snapshot, branch).unwrap();
        prop_assert!(id.cache_key().starts_with(&id.branch_agnostic_cache_key()));
    }
}
