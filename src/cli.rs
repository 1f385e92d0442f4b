use clap::{Parser, Subcommand};

/// creds — scoped bearer credentials for a small user registry
#[derive(Parser)]
#[command(name = "creds", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to $PORT, then 8080)
        #[arg(short, long)]
        port: Option<u16>,
        /// Use a volatile in-memory store and print a freshly bootstrapped admin token
        #[arg(long)]
        in_memory: bool,
    },

    /// Run database migrations and exit
    Migrate,

    /// Create a user holding an admin-scoped token, bypassing the API.
    /// Intended for issuing the very first credential.
    Bootstrap {
        #[arg(long, default_value = "Admin")]
        name: String,
        #[arg(long, default_value = "admin")]
        username: String,
    },
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    #[test]
    fn test_help_and_version_need_no_environment() {
        let err = Cli::try_parse_from(["creds", "--help"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);

        let err = Cli::try_parse_from(["creds", "--version"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["creds", "migrate"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Migrate)));

        let cli = Cli::try_parse_from(["creds", "serve", "--port", "9000", "--in-memory"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Serve {
                port: Some(9000),
                in_memory: true
            })
        ));

        let cli = Cli::try_parse_from(["creds", "bootstrap"]).unwrap();
        match cli.command {
            Some(Commands::Bootstrap { name, username }) => {
                assert_eq!(name, "Admin");
                assert_eq!(username, "admin");
            }
            _ => panic!("expected bootstrap"),
        }

        assert!(Cli::try_parse_from(["creds"]).unwrap().command.is_none());
    }
}
