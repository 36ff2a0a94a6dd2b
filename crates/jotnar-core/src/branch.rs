//! Pure target-branch mapping (spec §3 "Target Branch" / §6 "Branch mapping").
//!
//! Grounded in `agents/triage_agent.py::_map_version_to_branch` and
//! `_construct_internal_branch_name` from the original implementation:
//! the regex, the `.0` suffix rule (omitted once the major version reaches
//! 10), and the CentOS Stream fallback are carried over verbatim.

use regex::Regex;

/// A parsed `rhel-N.M` / `rhel-N.M.z` fix-version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixVersion {
    pub major: u32,
    pub minor: u32,
    pub is_zstream: bool,
}

/// Parse a fix-version string such as `rhel-9.4` or `rhel-9.4.z`.
/// Case-insensitive; returns `None` if it doesn't match the `rhel-N.M(.z)?` shape.
pub fn parse_fix_version(version: &str) -> Option<FixVersion> {
    let re = Regex::new(r"(?i)^rhel-(\d+)\.(\d+)(\.z)?").ok()?;
    let caps = re.captures(version)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    let is_zstream = caps.get(3).is_some();
    Some(FixVersion {
        major,
        minor,
        is_zstream,
    })
}

/// `rhel-{major}.{minor}`, with a trailing `.0` unless major >= 10.
pub fn construct_internal_branch_name(major: u32, minor: u32) -> String {
    let base = format!("rhel-{major}.{minor}");
    if major < 10 {
        format!("{base}.0")
    } else {
        base
    }
}

/// Derive the dist-git target branch for a ticket (spec §3/§6).
///
/// - `cve_needs_internal_fix`: true when the CVE eligibility result says an
///   internal RHEL fix must land first.
/// - `y_stream_exists_for_major`: whether a Y-stream development branch is
///   currently maintained for `fix_version`'s major version.
/// - `internal_branches`: the package's known internal dist-git branches,
///   used only for the Z-stream-without-CVE path.
///
/// Returns `None` if `fix_version` doesn't parse, callers should route that
/// to a `clarification-needed`/`error` outcome rather than guess.
pub fn determine_target_branch(
    fix_version: &str,
    cve_needs_internal_fix: bool,
    y_stream_exists_for_major: bool,
    internal_branches: &[String],
) -> Option<String> {
    let parsed = parse_fix_version(fix_version)?;

    if cve_needs_internal_fix {
        if y_stream_exists_for_major {
            return Some(construct_internal_branch_name(parsed.major, parsed.minor));
        }
        return Some(format!("c{}s", parsed.major));
    }

    if parsed.is_zstream {
        let expected = construct_internal_branch_name(parsed.major, parsed.minor);
        if internal_branches.iter().any(|b| b == &expected) {
            return Some(expected);
        }
    }

    Some(format!("c{}s", parsed.major))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_y_stream_and_z_stream() {
        let y = parse_fix_version("rhel-9.8").unwrap();
        assert_eq!(y, FixVersion { major: 9, minor: 8, is_zstream: false });

        let z = parse_fix_version("rhel-10.2.z").unwrap();
        assert_eq!(z, FixVersion { major: 10, minor: 2, is_zstream: true });

        assert!(parse_fix_version("not-a-version").is_none());
    }

    #[test]
    fn internal_branch_name_omits_dot_zero_at_10() {
        assert_eq!(construct_internal_branch_name(9, 4), "rhel-9.4.0");
        assert_eq!(construct_internal_branch_name(10, 2), "rhel-10.2");
    }

    #[test]
    fn cve_internal_fix_with_y_stream_uses_internal_branch() {
        let branch = determine_target_branch("rhel-9.4", true, true, &[]);
        assert_eq!(branch.as_deref(), Some("rhel-9.4.0"));
    }

    #[test]
    fn cve_internal_fix_without_y_stream_falls_back_to_stream() {
        let branch = determine_target_branch("rhel-8.10", true, false, &[]);
        assert_eq!(branch.as_deref(), Some("c8s"));
    }

    /// S5, Branch mapping for internal Z-stream.
    #[test]
    fn zstream_with_existing_internal_branch_is_used() {
        let internal = vec!["rhel-9.4.0".to_string()];
        let branch = determine_target_branch("rhel-9.4.z", false, false, &internal);
        assert_eq!(branch.as_deref(), Some("rhel-9.4.0"));
    }

    #[test]
    fn zstream_without_internal_branch_falls_back_to_stream() {
        let branch = determine_target_branch("rhel-9.4.z", false, false, &[]);
        assert_eq!(branch.as_deref(), Some("c9s"));
    }

    #[test]
    fn non_zstream_without_cve_goes_to_stream() {
        let branch = determine_target_branch("rhel-9.4", false, true, &[]);
        assert_eq!(branch.as_deref(), Some("c9s"));
    }

    #[test]
    fn unparseable_version_yields_none() {
        assert_eq!(determine_target_branch("garbage", false, false, &[]), None);
    }
}
