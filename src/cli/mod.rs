//! The `tokencert` command line tool.

pub mod options;

use std::fmt;

use crate::{
    commons::error::TokenError,
    config::{Config, ConfigError},
    token::{CandidateModule, TokenSessionManager},
};

use self::options::{Command, Options};

//------------ TokenCertCli --------------------------------------------------

pub struct TokenCertCli;

impl TokenCertCli {
    /// Runs the command and returns what should be printed to stdout.
    pub async fn run(options: Options) -> Result<String, Error> {
        let config = Config::create(options.general.config.as_deref())?;

        let candidates = if options.general.modules.is_empty() {
            config.candidates()
        } else {
            options.general.modules.iter().map(CandidateModule::new).collect()
        };

        match options.command {
            Command::Modules => Ok(Self::modules(&candidates)),
            Command::Alias => {
                let manager = Self::manager(&config, candidates, options.general.pin)?;
                let res = manager.alias().await;
                manager.logout().await;
                Ok(res?)
            }
            Command::Show => {
                let manager = Self::manager(&config, candidates, options.general.pin)?;
                let res = Self::show(&manager).await;
                manager.logout().await;
                res
            }
        }
    }

    fn modules(candidates: &[CandidateModule]) -> String {
        candidates
            .iter()
            .map(|candidate| format!("{}\t{}", candidate.name(), candidate.path().display()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn manager(
        config: &Config,
        candidates: Vec<CandidateModule>,
        pin: Option<String>,
    ) -> Result<TokenSessionManager, Error> {
        let manager = TokenSessionManager::new(candidates)?.with_timeout(config.token_timeout);
        manager.set_pin(pin);
        Ok(manager)
    }

    async fn show(manager: &TokenSessionManager) -> Result<String, Error> {
        let session = manager.open_session().await?;
        let certificate = manager.signing_certificate().await?;
        Ok(format!(
            "token:      {}\nlibrary:    {}\n{}",
            session.info(),
            session.module().candidate().path().display(),
            certificate
        ))
    }
}

//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Token(TokenError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Token(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<TokenError> for Error {
    fn from(e: TokenError) -> Self {
        Error::Token(e)
    }
}
