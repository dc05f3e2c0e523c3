use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, StatsError};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub org: OrgConfig,
    pub stats: StatsConfig,
    /// Production sheet targets
    pub sheets: SheetsConfig,
    /// Sheet targets used with `--test`
    pub test_sheets: SheetsConfig,
    pub run: RunConfig,
}

/// Addresses, labels and subject markers that drive message classification
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrgConfig {
    /// Organisation mail domain; senders in it are "internal" unless allowlisted
    pub domain: String,
    pub support_address: String,
    pub ideas_address: String,
    /// Address the web forms and help-desk line send from
    pub auto_reply_address: String,
    /// Service accounts that never count as internal senders
    pub internal_allowlist: Vec<String>,
    /// Sender substrings marking bounces and delivery failures
    pub spam_senders: Vec<String>,
    /// Any label containing one of these phrases marks the thread open
    pub open_markers: Vec<String>,
    pub demo_subject: String,
    pub inquiry_subject: String,
    pub voicemail_subject: String,
    pub sales_ping_label: String,
    pub new_org_label: String,
    pub check_in_label: String,
    /// Offset applied to dates that carry no timezone
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRule {
    pub into: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Near-duplicate categories folded together before totals
    pub merges: Vec<MergeRule>,
    /// Sheet categories that are totalled as pings rather than non-pings
    pub ping_categories: Vec<String>,
    /// Winning categories that never enter open/closed inquiry totals
    pub excluded_from_inquiries: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    /// JSON workbook holding member, admin and weekly stats sheets
    pub workbook: String,
    pub member_sheet: String,
    pub admin_sheet: String,
    pub short_name_range: String,
    pub weekly_sheet: String,
    /// Column index the weekly stats column is inserted at
    pub insert_column: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub ledger: String,
    pub output_dir: String,
    pub report_to: String,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            domain: "irbnet.org".to_string(),
            support_address: "support@irbnet.org".to_string(),
            ideas_address: "ideas@irbnet.org".to_string(),
            auto_reply_address: "noreply@irbnet.org".to_string(),
            internal_allowlist: [
                "support@irbnet.org",
                "ideas@irbnet.org",
                "noreply@irbnet.org",
                "supportdesk@irbnet.org",
                "techsupport@irbnet.org",
                "report_heartbeat@irbnet.org",
                "report_monitor@irbnet.org",
                "alerts@irbnet.org",
                "wizards@irbnet.org",
                "reportmonitor2@irbnet.org",
                "govsupport@irbnet.org",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            spam_senders: [
                "mailer-daemon@lnapl005.hphc.org",
                "mail delivery system",
                "dmrn_exceptions@dmrn.dhhq.health.mil",
                "supportdesk@irbnet.org",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            open_markers: ["Waiting on", "TO DO", "To Call"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            demo_subject: "IRBNet Demo Request".to_string(),
            inquiry_subject: "IRBNet Inquiry From".to_string(),
            voicemail_subject: "IRBNet Help Desk Inquiry".to_string(),
            sales_ping_label: "Sales Pings".to_string(),
            new_org_label: "New Organizations".to_string(),
            check_in_label: "check-in call".to_string(),
            utc_offset_hours: -5,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        let rule = |into: &str, sources: &[&str]| MergeRule {
            into: into.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            merges: vec![
                rule(
                    "Change Request",
                    &["Change Request", "Change Request - Access Level"],
                ),
                rule("Issues", &["Issue", "System Access Issue", "Issue/PDF"]),
                rule("CITI", &["CITI Integration", "CITI Interface Errors"]),
            ],
            ping_categories: ["Welcome to Support", "Welcome Ping", "Sales"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            excluded_from_inquiries: ["Sales Pings", "Sales"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            workbook: "~/.local/share/support-stats/workbook.json".to_string(),
            member_sheet: "Member Stats".to_string(),
            admin_sheet: "Support Outreach Administrators".to_string(),
            short_name_range: "short_names".to_string(),
            weekly_sheet: "Weekly Support Stats".to_string(),
            insert_column: 1,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ledger: "~/.local/share/support-stats/open.txt".to_string(),
            output_dir: "~/.local/share/support-stats/out".to_string(),
            report_to: "andy@irbnet.org".to_string(),
        }
    }
}

impl Config {
    /// Default config location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("support-stats/config.toml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/support-stats/config.toml"))
    }

    /// Load from `path`, or the default location. A missing default file
    /// yields the built-in defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !config_path.exists() {
            if explicit {
                return Err(StatsError::Config(format!(
                    "{} does not exist",
                    config_path.display()
                )));
            }
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content).map_err(|e| StatsError::Config(e.to_string()))
    }

    /// Sheet targets for this run
    pub fn sheets_for(&self, test: bool) -> &SheetsConfig {
        if test { &self.test_sheets } else { &self.sheets }
    }
}

/// Expand `~` in a configured path
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [org]
            domain = "example.org"

            [stats]
            ping_categories = ["Sales"]
            "#,
        )
        .unwrap();
        assert_eq!(config.org.domain, "example.org");
        assert_eq!(config.org.support_address, "support@irbnet.org");
        assert_eq!(config.stats.ping_categories, vec!["Sales".to_string()]);
        assert_eq!(config.stats.merges.len(), 3);
        assert_eq!(config.sheets.member_sheet, "Member Stats");
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_test_target_selection() {
        let mut config = Config::default();
        config.test_sheets.weekly_sheet = "Scratch".to_string();
        assert_eq!(config.sheets_for(true).weekly_sheet, "Scratch");
        assert_eq!(config.sheets_for(false).weekly_sheet, "Weekly Support Stats");
    }
}
