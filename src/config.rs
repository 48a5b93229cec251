use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize as _, Deserializer};
use serde_derive::Deserialize;
use thiserror::Error;

use crate::engine::{Account, Record};

/// Provider defaults, straight from the update protocol this tool speaks.
pub const DEFAULT_GET_IP_URL: &str = "http://www.dnsmadeeasy.com/myip.jsp";
pub const DEFAULT_UPDATE_IP_URL: &str = "https://www.dnsmadeeasy.com/servlet/updateip";

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub general: General,

    #[serde(default)]
    pub account: HashMap<Box<str>, AccountConfig>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct General {
    pub log_level: Box<str>,
    pub user_agent: Box<str>,

    /// Seconds granted to every network call before it is abandoned, so one
    /// unreachable server cannot stall the whole run.
    pub timeout: u64,
}

impl Default for General {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            user_agent: concat!("ddns-sync/", env!("CARGO_PKG_VERSION")).into(),
            timeout: 10,
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccountConfig {
    pub username: Box<str>,
    pub password: Box<str>,

    #[serde(default = "default_get_ip_url")]
    pub get_ip_url: Box<str>,

    #[serde(default = "default_update_ip_url")]
    pub update_ip_url: Box<str>,

    #[serde(default)]
    pub record: Vec<RecordConfig>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RecordConfig {
    pub name: Box<str>,

    /// A single id, or a list of ids sharing the account password.
    #[serde(deserialize_with = "one_or_more_string")]
    pub id: Vec<Box<str>>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(Box<str>),
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Pre-flight checks. Nothing touches the network before these pass.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.account.is_empty() {
            return Err(ConfigError::Invalid(
                "no [account.*] sections configured".into(),
            ));
        }

        for (name, account) in &self.account {
            if account.record.is_empty() {
                return Err(ConfigError::Invalid(
                    format!("account {}: no records configured", name).into(),
                ));
            }

            for record in &account.record {
                if record.id.is_empty() {
                    return Err(ConfigError::Invalid(
                        format!("account {}: record {} has no ids", name, record.name).into(),
                    ));
                }

                // Ids are comma-joined on the wire, so a comma inside one
                // would silently change what gets updated.
                if let Some(bad) = record
                    .id
                    .iter()
                    .find(|id| id.is_empty() || id.contains(','))
                {
                    return Err(ConfigError::Invalid(
                        format!(
                            "account {}: record {} has a malformed id {:?}",
                            name, record.name, bad
                        )
                        .into(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.general.timeout)
    }

    /// The validated account/record list the engine runs over, ordered by
    /// account name so every run processes them the same way.
    pub fn into_accounts(self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .account
            .into_iter()
            .map(|(name, account)| Account {
                name,
                username: account.username,
                password: account.password,
                get_ip_url: account.get_ip_url,
                update_ip_url: account.update_ip_url,
                records: account
                    .record
                    .into_iter()
                    .map(|record| Record {
                        name: record.name,
                        ids: record.id,
                    })
                    .collect(),
            })
            .collect();

        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        accounts
    }
}

fn default_get_ip_url() -> Box<str> {
    DEFAULT_GET_IP_URL.into()
}

fn default_update_ip_url() -> Box<str> {
    DEFAULT_UPDATE_IP_URL.into()
}

fn one_or_more_string<'de, D>(deserializer: D) -> Result<Vec<Box<str>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMore {
        One(Box<str>),
        More(Vec<Box<str>>),
    }

    Ok(match OneOrMore::deserialize(deserializer)? {
        OneOrMore::One(id) => vec![id],
        OneOrMore::More(ids) => ids,
    })
}
