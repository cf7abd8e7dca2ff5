//! Aggregate attribute synthesis — one stat record derived from many.

use std::time::SystemTime;

use crate::members::MemberFile;

/// The merged metadata record reported for a synthetic aggregate file.
///
/// Computed fresh for every metadata query and never persisted. Ownership
/// fields stay `None` when there are no members; callers decide how to
/// render the unset case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateAttrs {
    /// Sum of all member sizes.
    pub size: u64,
    /// Earliest ctime among members; "now" for an empty member set, so a
    /// transiently empty aggregate still reports a valid record.
    pub ctime: SystemTime,
    /// Latest mtime among members; epoch for an empty member set.
    pub mtime: SystemTime,
    /// First-encountered member's mode.
    pub mode: Option<u32>,
    /// First-encountered member's owner.
    pub uid: Option<u32>,
    /// First-encountered member's group.
    pub gid: Option<u32>,
    /// Always 1 — the aggregate has no hard links.
    pub nlink: u32,
}

impl AggregateAttrs {
    /// Fold the member list into one record. Order-independent for size and
    /// the time bounds; mode/uid/gid take the first member encountered.
    /// Accumulates incrementally — O(1) extra memory per member.
    pub fn synthesize(members: &[MemberFile]) -> Self {
        let mut attrs = AggregateAttrs {
            size: 0,
            ctime: SystemTime::now(),
            mtime: SystemTime::UNIX_EPOCH,
            mode: None,
            uid: None,
            gid: None,
            nlink: 1,
        };
        for m in members {
            if m.ctime < attrs.ctime {
                attrs.ctime = m.ctime;
            }
            if m.mtime > attrs.mtime {
                attrs.mtime = m.mtime;
            }
            if attrs.mode.is_none() {
                attrs.mode = Some(m.mode);
            }
            if attrs.uid.is_none() {
                attrs.uid = Some(m.uid);
            }
            if attrs.gid.is_none() {
                attrs.gid = Some(m.gid);
            }
            attrs.size += m.size;
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::members::unix_time;
    use std::path::PathBuf;

    fn member(name: &str, size: u64, ctime: i64, mtime: i64, uid: u32) -> MemberFile {
        MemberFile {
            path: PathBuf::from(format!("/tmp/{name}")),
            name: name.to_string(),
            size,
            mtime: unix_time(mtime, 0),
            ctime: unix_time(ctime, 0),
            uid,
            gid: 100,
            mode: 0o100644,
        }
    }

    #[test]
    fn empty_set_still_produces_a_record() {
        let before = SystemTime::now();
        let attrs = AggregateAttrs::synthesize(&[]);
        assert_eq!(attrs.size, 0);
        assert_eq!(attrs.mtime, SystemTime::UNIX_EPOCH);
        assert!(attrs.ctime >= before);
        assert_eq!(attrs.mode, None);
        assert_eq!(attrs.uid, None);
        assert_eq!(attrs.gid, None);
        assert_eq!(attrs.nlink, 1);
    }

    #[test]
    fn size_is_member_sum() {
        let members = [
            member("a.sql", 100, 1_000, 2_000, 1),
            member("b.sql", 5000, 1_100, 1_900, 2),
        ];
        assert_eq!(AggregateAttrs::synthesize(&members).size, 5100);
    }

    #[test]
    fn time_bounds_fold() {
        let members = [
            member("a.sql", 1, 5_000, 6_000, 1),
            member("b.sql", 1, 4_000, 9_000, 1),
            member("c.sql", 1, 4_500, 7_000, 1),
        ];
        let attrs = AggregateAttrs::synthesize(&members);
        assert_eq!(attrs.ctime, unix_time(4_000, 0));
        assert_eq!(attrs.mtime, unix_time(9_000, 0));
    }

    #[test]
    fn ownership_is_first_wins() {
        let members = [
            member("a.sql", 1, 1, 1, 42),
            member("b.sql", 1, 1, 1, 7),
        ];
        let attrs = AggregateAttrs::synthesize(&members);
        assert_eq!(attrs.uid, Some(42));
        assert_eq!(attrs.gid, Some(100));
        assert_eq!(attrs.mode, Some(0o100644));
    }
}
