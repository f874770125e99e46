//! Lease row key encoding.

use distributed_lease_core::identity::LockIdentity;

/// Row key for `identity`: namespace segments and name joined by `|`.
///
/// The scope is not part of the key; a backend instance serves one account.
/// Identity validation already guarantees no segment contains the delimiter,
/// so distinct identities never share a key.
pub fn lease_name(identity: &LockIdentity) -> String {
    identity.delimited_key()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_name() {
        let one = LockIdentity::new("acct", ["host"], "job").unwrap();
        let two = LockIdentity::new("acct", ["host", "func"], "job").unwrap();
        assert_eq!(lease_name(&one), "host|job");
        assert_eq!(lease_name(&two), "host|func|job");
    }

    #[test]
    fn test_distinct_shapes_do_not_collide() {
        let a = LockIdentity::new("acct", ["a", "b"], "c").unwrap();
        let b = LockIdentity::new("acct", ["a"], "b").unwrap();
        assert_ne!(lease_name(&a), lease_name(&b));
    }
}
