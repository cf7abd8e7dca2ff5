//! Range reads against the logical concatenation of an aggregate's members.
//!
//! Streamed seek: whole members below the requested offset are skipped by
//! size arithmetic alone, then the first overlapping member is read from its
//! interior and subsequent members follow until the request is satisfied.
//! Nothing is materialized and no process is spawned — memory use is bounded
//! by the requested length, not by the aggregate size.

use std::io::SeekFrom;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

use dumpfs_core::DumpfsResult;

use crate::members::{classify, list_members, MemberFile};
use crate::policy::AggregatePolicy;

/// Serve `length` bytes of the aggregate of `dir` starting at `offset`.
///
/// Enumerates members exactly once: the skip arithmetic and the content walk
/// both use the same captured list, so reported size and returned bytes
/// cannot disagree within one call. Across calls membership is re-derived
/// from live directory state — there is no cache to invalidate.
///
/// Returns fewer bytes than requested at end of aggregate and an empty vec
/// when `offset` is at or past the total size (or the directory has no
/// members at all).
pub async fn read_range(
    dir: &Path,
    policy: &AggregatePolicy,
    offset: u64,
    length: usize,
) -> DumpfsResult<Vec<u8>> {
    let members = list_members(dir, policy).await?;
    read_members_range(&members, offset, length).await
}

/// The walk itself, over an already-captured member list.
///
/// A member that shrank since its stat was captured yields a short read and
/// the walk continues with the next member; a member that became unreadable
/// surfaces the storage error unchanged (no zero-fill substitution).
pub async fn read_members_range(
    members: &[MemberFile],
    offset: u64,
    length: usize,
) -> DumpfsResult<Vec<u8>> {
    let mut out = Vec::with_capacity(length.min(1 << 20));
    let mut skip = offset;
    let mut remaining = length;

    for m in members {
        if remaining == 0 {
            break;
        }
        if skip >= m.size {
            skip -= m.size;
            continue;
        }

        let mut file = tokio::fs::File::open(&m.path)
            .await
            .map_err(|e| classify(e, &m.path))?;
        if skip > 0 {
            file.seek(SeekFrom::Start(skip)).await.map_err(|e| classify(e, &m.path))?;
        }

        let want = usize::try_from(m.size - skip)
            .unwrap_or(usize::MAX)
            .min(remaining);
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| classify(e, &m.path))?;
            if n == 0 {
                warn!(member = %m.path.display(), want, got = filled, "member shorter than its stat record");
                break;
            }
            filled += n;
        }
        out.extend_from_slice(&buf[..filled]);
        remaining -= filled;
        skip = 0;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::members::MemberFile;
    use dumpfs_core::config::OverlayConfig;

    fn lax_policy() -> AggregatePolicy {
        AggregatePolicy::from_config(&OverlayConfig {
            strict_path_validation: false,
            ..OverlayConfig::default()
        })
        .unwrap()
    }

    async fn capture(dir: &Path) -> Vec<MemberFile> {
        list_members(dir, &lax_policy()).await.unwrap()
    }

    #[tokio::test]
    async fn zero_members_reads_empty_at_any_offset() {
        let dir = tempfile::tempdir().unwrap();
        for offset in [0, 1, 1 << 20] {
            let data = read_range(dir.path(), &lax_policy(), offset, 4096)
                .await
                .unwrap();
            assert!(data.is_empty());
        }
    }

    #[tokio::test]
    async fn offset_past_end_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sql"), b"0123456789").unwrap();

        let data = read_range(dir.path(), &lax_policy(), 10, 16).await.unwrap();
        assert!(data.is_empty());
        let data = read_range(dir.path(), &lax_policy(), 999, 16).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn length_clips_at_end_of_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sql"), b"0123456789").unwrap();

        let data = read_range(dir.path(), &lax_policy(), 6, 100).await.unwrap();
        assert_eq!(data, b"6789");
    }

    #[tokio::test]
    async fn shrunken_member_truncates_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sql"), vec![b'a'; 64]).unwrap();
        std::fs::write(dir.path().join("b.sql"), vec![b'b'; 64]).unwrap();

        let members = capture(dir.path()).await;
        // Shrink the first member after the stat snapshot was taken.
        let first = &members[0].path;
        std::fs::write(first, &vec![b'x'; 16]).unwrap();

        let data = read_members_range(&members, 0, 128).await.unwrap();
        // 16 bytes actually present in the shrunken member + 64 of the other.
        assert_eq!(data.len(), 80);
    }

    #[tokio::test]
    async fn deleted_member_surfaces_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sql"), vec![b'a'; 32]).unwrap();

        let members = capture(dir.path()).await;
        std::fs::remove_file(&members[0].path).unwrap();

        assert!(read_members_range(&members, 0, 32).await.is_err());
    }
}
