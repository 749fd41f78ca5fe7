//! Device families and their per-vendor shell conventions.
//!
//! Each known family carries the command that disables output paging, the
//! command that prints its version banner, and the lower-case marker that
//! identifies it inside that banner. Adding a vendor means adding a variant
//! here; the session and pool code only go through these accessors.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Vendor family of a network device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    Huawei,
    H3C,
    Cisco,
    /// Not declared by the caller and not detected yet.
    #[default]
    Unknown,
}

impl DeviceFamily {
    /// Known families in detection priority order.
    pub const KNOWN: [DeviceFamily; 3] =
        [DeviceFamily::Huawei, DeviceFamily::H3C, DeviceFamily::Cisco];

    /// Parses an inventory brand string. Anything unrecognised becomes [`DeviceFamily::Unknown`].
    pub fn from_hint(hint: &str) -> Self {
        let hint = hint.trim();
        Self::KNOWN
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(hint))
            .unwrap_or(DeviceFamily::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceFamily::Huawei => "huawei",
            DeviceFamily::H3C => "h3c",
            DeviceFamily::Cisco => "cisco",
            DeviceFamily::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DeviceFamily::Unknown)
    }

    /// Command that turns off "--More--" style paging for the rest of the session.
    pub fn pagination_command(&self) -> Option<&'static str> {
        match self {
            DeviceFamily::Huawei => Some("screen-length 0 temporary"),
            DeviceFamily::H3C => Some("screen-length disable"),
            DeviceFamily::Cisco => Some("terminal length 0"),
            DeviceFamily::Unknown => None,
        }
    }

    /// Command printing the version banner. Huawei and H3C share the VRP-style `display` verb.
    pub fn version_command(&self) -> Option<&'static str> {
        match self {
            DeviceFamily::Huawei | DeviceFamily::H3C => Some("display version"),
            DeviceFamily::Cisco => Some("show version"),
            DeviceFamily::Unknown => None,
        }
    }

    /// Lower-case substring identifying this family in a version banner.
    pub fn banner_marker(&self) -> Option<&'static str> {
        match self {
            DeviceFamily::Unknown => None,
            known => Some(known.name()),
        }
    }

    /// Distinct version commands of all known families, in priority order.
    pub fn probe_commands() -> Vec<&'static str> {
        let mut commands: Vec<&'static str> = Vec::new();
        for family in Self::KNOWN {
            if let Some(cmd) = family.version_command()
                && !commands.contains(&cmd)
            {
                commands.push(cmd);
            }
        }
        commands
    }

    /// Matches a version transcript against the known banner markers.
    pub fn detect(transcript: &str) -> Self {
        let lower = transcript.to_lowercase();
        Self::KNOWN
            .into_iter()
            .find(|family| {
                family
                    .banner_marker()
                    .is_some_and(|marker| lower.contains(marker))
            })
            .unwrap_or(DeviceFamily::Unknown)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceFamily {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_hint(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_are_case_insensitive() {
        assert_eq!(DeviceFamily::from_hint("HuaWei"), DeviceFamily::Huawei);
        assert_eq!(DeviceFamily::from_hint(" h3c\r\n"), DeviceFamily::H3C);
        assert_eq!(DeviceFamily::from_hint("CISCO"), DeviceFamily::Cisco);
        assert_eq!(DeviceFamily::from_hint("juniper"), DeviceFamily::Unknown);
        assert_eq!(DeviceFamily::from_hint(""), DeviceFamily::Unknown);
    }

    #[test]
    fn every_known_family_has_pagination_and_marker() {
        for family in DeviceFamily::KNOWN {
            assert!(family.pagination_command().is_some(), "{family}");
            assert!(family.banner_marker().is_some(), "{family}");
        }
        assert_eq!(DeviceFamily::Unknown.pagination_command(), None);
    }

    #[test]
    fn detection_follows_priority_order() {
        let banner = "Huawei Versatile Routing Platform Software\r\nH3C compatible";
        assert_eq!(DeviceFamily::detect(banner), DeviceFamily::Huawei);
        assert_eq!(
            DeviceFamily::detect("H3C Comware Platform Software"),
            DeviceFamily::H3C
        );
        assert_eq!(
            DeviceFamily::detect("Cisco IOS Software, C2960 Software"),
            DeviceFamily::Cisco
        );
        assert_eq!(
            DeviceFamily::detect("% Unknown command"),
            DeviceFamily::Unknown
        );
    }

    #[test]
    fn probe_commands_are_deduplicated() {
        assert_eq!(
            DeviceFamily::probe_commands(),
            vec!["display version", "show version"]
        );
    }

    #[test]
    fn serializes_as_lowercase() {
        let json = serde_json::to_string(&DeviceFamily::H3C).expect("serialize");
        assert_eq!(json, "\"h3c\"");
        let family: DeviceFamily = serde_json::from_str("\"cisco\"").expect("deserialize");
        assert_eq!(family, DeviceFamily::Cisco);
    }
}
