//! Membership badge tooltip parsing.

use regex::Regex;

use crate::config::BadgeConfig;
use crate::error::{ReplayError, Result};

/// Tenure milestones (months) that have a pre-rendered badge icon.
pub const MILESTONES: [u32; 6] = [24, 12, 6, 2, 1, 0];

/// Largest milestone not exceeding `months`.
pub fn milestone_for(months: u32) -> u32 {
    MILESTONES
        .into_iter()
        .find(|milestone| *milestone <= months)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct CompiledLocale {
    name: String,
    new_member: Regex,
    tenure: Regex,
}

/// Compiled set of locale matchers.
#[derive(Debug, Clone)]
pub struct BadgeMatcher {
    locales: Vec<CompiledLocale>,
}

impl BadgeMatcher {
    /// Compile the configured locales.
    pub fn new(config: &BadgeConfig) -> Result<Self> {
        let locales = config
            .locales
            .iter()
            .map(|locale| {
                let compile = |pattern: &str| {
                    Regex::new(pattern).map_err(|e| {
                        ReplayError::config(format!(
                            "Invalid badge pattern for locale {}: {}",
                            locale.name, e
                        ))
                    })
                };
                Ok(CompiledLocale {
                    name: locale.name.clone(),
                    new_member: compile(&locale.new_member)?,
                    tenure: compile(&locale.tenure)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { locales })
    }

    /// Membership tenure in months described by a badge tooltip.
    pub fn tenure_months(&self, tooltip: &str) -> Result<u32> {
        if self
            .locales
            .iter()
            .any(|locale| locale.new_member.is_match(tooltip))
        {
            return Ok(0);
        }

        for locale in &self.locales {
            let Some(caps) = locale.tenure.captures(tooltip) else {
                continue;
            };
            let years = caps.name("years");
            let months = caps.name("months");
            if years.is_none() && months.is_none() {
                continue;
            }
            let parse = |m: Option<regex::Match<'_>>| -> Result<u32> {
                m.map(|m| {
                    m.as_str().parse::<u32>().map_err(|_| {
                        ReplayError::badge_parse(format!(
                            "Invalid number in {} tooltip: {tooltip:?}",
                            locale.name
                        ))
                    })
                })
                .transpose()
                .map(Option::unwrap_or_default)
            };
            return Ok(12 * parse(years)? + parse(months)?);
        }

        Err(ReplayError::badge_parse(format!(
            "Cannot parse member badge duration: {tooltip:?}"
        )))
    }
}

impl Default for BadgeMatcher {
    fn default() -> Self {
        // The built-in patterns are literals known to compile.
        let locales = BadgeConfig::default()
            .locales
            .into_iter()
            .filter_map(|locale| {
                Some(CompiledLocale {
                    new_member: Regex::new(&locale.new_member).ok()?,
                    tenure: Regex::new(&locale.tenure).ok()?,
                    name: locale.name,
                })
            })
            .collect();
        Self { locales }
    }
}
