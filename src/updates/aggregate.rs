// src/updates/aggregate.rs

//! Merging update uploads into the latest-version aggregate
//!
//! The merge is a pure function so it can be tested in isolation and run
//! inside the catalog's write transaction. Rules:
//!
//! 1. With no aggregate yet, the headline (version, notes, pub_date) comes
//!    from the update.
//! 2. A strictly newer version replaces the headline.
//! 3. An equal version keeps the headline version and date; its notes
//!    replace the headline notes when non-empty.
//! 4. An older version leaves the headline alone but still refreshes its
//!    own platform entry.
//! 5. Every fixed platform key is present afterwards; missing ones are
//!    filled with empty entries.

use super::platform::{all_platform_keys, platform_key};
use crate::db::models::{LatestVersionAggregate, PlatformEntry, UpdateBinary};
use crate::version::{ReleaseVersion, compare_versions};
use std::cmp::Ordering;

/// Merge `update` into `current`, returning the new aggregate
pub fn merge_update(
    current: Option<LatestVersionAggregate>,
    update: &UpdateBinary,
) -> LatestVersionAggregate {
    let mut doc = match current {
        Some(mut doc) => {
            match compare_versions(&update.version, &doc.version) {
                Ordering::Greater => set_headline(&mut doc, update),
                Ordering::Equal if !update.notes.is_empty() => doc.notes = update.notes.clone(),
                _ => {}
            }
            doc
        }
        None => {
            let mut doc = LatestVersionAggregate::default();
            set_headline(&mut doc, update);
            doc
        }
    };

    for key in all_platform_keys() {
        doc.platforms.entry(key).or_default();
    }

    doc.platforms.insert(
        platform_key(update.platform, update.arch),
        PlatformEntry {
            signature: update.signature.clone(),
            url: update.download_url.clone(),
        },
    );

    doc
}

/// Whether `candidate` is strictly newer than `current`
pub fn is_newer(candidate: &str, current: &str) -> bool {
    ReleaseVersion::parse(candidate) > ReleaseVersion::parse(current)
}

fn set_headline(doc: &mut LatestVersionAggregate, update: &UpdateBinary) {
    doc.version = update.version.clone();
    doc.notes = update.notes.clone();
    doc.pub_date = update.release_date.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updates::{Arch, Platform};

    fn update(version: &str, platform: Platform, arch: Arch) -> UpdateBinary {
        let mut u = UpdateBinary::new(version, platform, arch, "app.bin", 42, format!("sig-{version}"));
        u.notes = format!("notes {version}");
        u
    }

    #[test]
    fn test_first_merge_takes_headline_and_fills_keys() {
        let doc = merge_update(None, &update("1.0.0", Platform::Linux, Arch::X86_64));

        assert_eq!(doc.version, "1.0.0");
        assert_eq!(doc.notes, "notes 1.0.0");
        assert_eq!(doc.platforms.len(), 12);
        assert_eq!(doc.platforms["linux-x86_64"].signature, "sig-1.0.0");
        assert_eq!(doc.platforms["windows-i686"], PlatformEntry::default());
    }

    #[test]
    fn test_newer_version_replaces_headline() {
        let doc = merge_update(None, &update("1.0.0", Platform::Linux, Arch::X86_64));
        let doc = merge_update(Some(doc), &update("1.10.0", Platform::Darwin, Arch::Aarch64));

        assert_eq!(doc.version, "1.10.0");
        assert_eq!(doc.platforms["linux-x86_64"].signature, "sig-1.0.0");
        assert_eq!(doc.platforms["darwin-aarch64"].signature, "sig-1.10.0");
    }

    #[test]
    fn test_older_version_keeps_headline_but_updates_entry() {
        let doc = merge_update(None, &update("1.0.0", Platform::Linux, Arch::X86_64));
        let older = update("0.9.0", Platform::Linux, Arch::X86_64);
        let doc = merge_update(Some(doc), &older);

        assert_eq!(doc.version, "1.0.0");
        assert_eq!(doc.notes, "notes 1.0.0");
        assert_eq!(doc.platforms["linux-x86_64"].signature, "sig-0.9.0");
        assert_eq!(doc.platforms["linux-x86_64"].url, older.download_url);
    }

    #[test]
    fn test_equal_version_refreshes_notes() {
        let first = update("2.0.0", Platform::Windows, Arch::X86_64);
        let doc = merge_update(None, &first);
        let mut same = update("v2.0.0", Platform::Linux, Arch::Armv7);
        same.notes = "different".to_string();
        same.release_date = "2030-01-01T00:00:00Z".to_string();
        let doc = merge_update(Some(doc), &same);

        assert_eq!(doc.version, "2.0.0");
        assert_eq!(doc.notes, "different");
        assert_eq!(doc.pub_date, first.release_date);
        assert_eq!(doc.platforms["linux-armv7"].signature, "sig-v2.0.0");
    }

    #[test]
    fn test_equal_version_without_notes_keeps_notes() {
        let doc = merge_update(None, &update("2.0.0", Platform::Windows, Arch::X86_64));
        let mut same = update("2.0.0", Platform::Darwin, Arch::X86_64);
        same.notes.clear();
        let doc = merge_update(Some(doc), &same);

        assert_eq!(doc.notes, "notes 2.0.0");
    }

    #[test]
    fn test_older_version_never_touches_notes() {
        let doc = merge_update(None, &update("2.0.0", Platform::Windows, Arch::X86_64));
        let doc = merge_update(Some(doc), &update("1.0.0", Platform::Windows, Arch::X86_64));
        assert_eq!(doc.notes, "notes 2.0.0");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let u = update("1.2.3", Platform::Darwin, Arch::X86_64);
        let once = merge_update(None, &u);
        let twice = merge_update(Some(once.clone()), &u);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_existing_keys_are_kept() {
        let mut doc = merge_update(None, &update("1.0.0", Platform::Linux, Arch::X86_64));
        doc.platforms.insert("solaris-sparc".to_string(), PlatformEntry::default());
        let doc = merge_update(Some(doc), &update("1.0.1", Platform::Linux, Arch::I686));
        assert!(doc.platforms.contains_key("solaris-sparc"));
    }
}
