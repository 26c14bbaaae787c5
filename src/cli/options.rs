//! The command line options of the `tokencert` tool.

use std::path::PathBuf;

use clap::Parser;

use crate::constants::{TOKENCERT_ENV_CONFIG, TOKENCERT_ENV_PIN};

//------------ Options -------------------------------------------------------

/// The command line options for the tokencert tool.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Finds the signing certificate on a PKCS#11 smart card.",
)]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won't result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }
}

//------------ GeneralOptions ------------------------------------------------

/// The options common to all subcommands.
#[derive(clap::Args)]
pub struct GeneralOptions {
    /// Path to the configuration file.
    #[arg(short, long, env = TOKENCERT_ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// PKCS#11 library to try. May be given more than once, the libraries
    /// are tried in order and replace the configured and discovered ones.
    #[arg(short, long = "module", value_name = "PATH")]
    pub modules: Vec<PathBuf>,

    /// The PIN of the smart card.
    #[arg(long, env = TOKENCERT_ENV_PIN, hide_env_values = true)]
    pub pin: Option<String>,
}

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// List the PKCS#11 libraries that will be tried, in order.
    Modules,

    /// Print the alias of the signing certificate.
    Alias,

    /// Show the token and the details of the signing certificate.
    Show,
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modules_are_repeatable_and_ordered() {
        let options = Options::try_parse_from([
            "tokencert",
            "--module",
            "/usr/lib/a.so",
            "-m",
            "/usr/lib/b.so",
            "--pin",
            "1234",
            "alias",
        ])
        .unwrap();

        assert_eq!(
            vec![PathBuf::from("/usr/lib/a.so"), PathBuf::from("/usr/lib/b.so")],
            options.general.modules
        );
        assert_eq!(Some("1234".to_string()), options.general.pin);
        assert!(matches!(options.command, Command::Alias));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Options::try_parse_from(["tokencert"]).is_err());
    }

    #[test]
    fn config_and_pin_read_from_environment() {
        use clap::CommandFactory;

        let command = Options::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|env| env.to_string_lossy().into_owned())
        };

        assert_eq!(Some(TOKENCERT_ENV_CONFIG.to_string()), env_of("config"));
        assert_eq!(Some(TOKENCERT_ENV_PIN.to_string()), env_of("pin"));
        assert_eq!(None, env_of("modules"));
    }
}
