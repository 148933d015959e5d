use crate::cli::actions::{server, Action};
use anyhow::{anyhow, Result};
use secrecy::SecretString;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let secret = |name: &str| -> Result<SecretString> {
        matches
            .get_one::<String>(name)
            .map(|value| SecretString::from(value.clone()))
            .ok_or_else(|| anyhow!("missing required argument: --{name}"))
    };

    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches.get_one::<String>("dsn").cloned(),
        online_secret: secret("online-secret")?,
        offline_secret: secret("offline-secret")?,
        challenge_secret: secret("challenge-secret")?,
        system_secret: secret("system-secret")?,
        mail_url: matches.get_one::<String>("mail-url").cloned(),
        mail_api_key: matches
            .get_one::<String>("mail-api-key")
            .map(|value| SecretString::from(value.clone())),
        mail_from: matches
            .get_one::<String>("mail-from")
            .cloned()
            .unwrap_or_else(|| "no-reply@sigilo.dev".to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_a_server_action() {
        let matches = commands::new().get_matches_from(vec![
            "sigilo",
            "--online-secret",
            "online",
            "--offline-secret",
            "offline",
            "--challenge-secret",
            "challenge",
            "--system-secret",
            "system",
            "--port",
            "9000",
        ]);

        let Action::Server(args) = handler(&matches).unwrap();
        assert_eq!(args.port, 9000);
        assert!(args.dsn.is_none());
        assert!(args.mail_url.is_none());
        assert_eq!(args.mail_from, "no-reply@sigilo.dev");
    }
}
