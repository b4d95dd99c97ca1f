//! Platform classification of client user agents.
//!
//! Classification is an ordered list of [`PlatformRule`]s evaluated against
//! the lowercased user agent; the first rule that matches decides, and no
//! match yields [`Platform::Unclassified`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Electron,
    Web,
    Unclassified,
}

impl Platform {
    /// Every recognised platform, excluding the fallback.
    pub const NAMED: [Platform; 4] = [
        Platform::Android,
        Platform::Ios,
        Platform::Electron,
        Platform::Web,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Electron => "electron",
            Platform::Web => "web",
            Platform::Unclassified => "unclassified",
        }
    }

    pub fn is_named(&self) -> bool {
        !matches!(self, Platform::Unclassified)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single predicate: matches when the user agent contains at least one of
/// `any_of` (ignored if empty) and every entry of `all_of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRule {
    pub platform: Platform,
    #[serde(default)]
    pub any_of: Vec<String>,
    #[serde(default)]
    pub all_of: Vec<String>,
}

impl PlatformRule {
    pub fn new(platform: Platform, any_of: &[&str], all_of: &[&str]) -> Self {
        Self {
            platform,
            any_of: any_of.iter().map(|s| s.to_string()).collect(),
            all_of: all_of.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// A rule with no patterns would match everything.
    pub fn is_empty(&self) -> bool {
        self.any_of.is_empty() && self.all_of.is_empty()
    }

    fn matches(&self, user_agent: &str) -> bool {
        let any = self.any_of.is_empty() || self.any_of.iter().any(|p| user_agent.contains(p.as_str()));
        any && self.all_of.iter().all(|p| user_agent.contains(p.as_str()))
    }

    fn lowercased(mut self) -> Self {
        for pattern in self.any_of.iter_mut().chain(self.all_of.iter_mut()) {
            *pattern = pattern.to_lowercase();
        }
        self
    }
}

/// Default rule table. Element and Riot clients are split by OS; an
/// Element/Riot agent on anything else stays unclassified rather than
/// falling through to `web`.
pub fn default_rules() -> Vec<PlatformRule> {
    const CLIENTS: &[&str] = &["riot", "element"];
    vec![
        PlatformRule::new(Platform::Electron, CLIENTS, &["electron"]),
        PlatformRule::new(Platform::Android, CLIENTS, &["android"]),
        PlatformRule::new(Platform::Ios, CLIENTS, &["ios"]),
        PlatformRule::new(Platform::Unclassified, CLIENTS, &[]),
        PlatformRule::new(Platform::Web, &["mozilla", "gecko"], &[]),
    ]
}

#[derive(Debug, Clone)]
pub struct PlatformClassifier {
    rules: Vec<PlatformRule>,
}

impl PlatformClassifier {
    pub fn new(rules: Vec<PlatformRule>) -> Self {
        Self {
            rules: rules.into_iter().map(PlatformRule::lowercased).collect(),
        }
    }

    pub fn rules(&self) -> &[PlatformRule] {
        &self.rules
    }

    pub fn classify(&self, user_agent: &str) -> Platform {
        let user_agent = user_agent.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&user_agent))
            .map(|rule| rule.platform)
            .unwrap_or(Platform::Unclassified)
    }
}

impl Default for PlatformClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}
