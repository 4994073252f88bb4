//! Party verbs. Each maps to one daemon request and prints its outcome.

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use serde_json::Value;

use party_daemon::{request, DaemonRequest};

#[derive(Subcommand, Debug)]
pub enum PartyCommand {
    /// Start a party led by USER.
    Create { user: String },

    /// Invite TARGET into USER's party, creating one if needed.
    Invite { user: String, target: String },

    /// Accept the invite INVITER's party sent to USER.
    Accept { user: String, inviter: String },

    /// Decline the invite INVITER's party sent to USER.
    Decline { user: String, inviter: String },

    /// Join TARGET's party directly; it must be public.
    Join { user: String, target: String },

    /// Remove TARGET from USER's party.
    Kick { user: String, target: String },

    /// Raise TARGET one rank; a moderator promoted becomes leader.
    Promote { user: String, target: String },

    /// Leave the current party. A leader leaving disbands it.
    Leave { user: String },

    /// Disband USER's party.
    Disband { user: String },

    /// Open or close USER's party to direct joins.
    Public {
        user: String,
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Call every reachable member to USER's backend.
    Summon { user: String },

    /// Show USER's party grouped by rank.
    List { user: String },

    /// Drain USER's pending notices.
    Notices { user: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl PartyCommand {
    fn into_request(self) -> DaemonRequest {
        match self {
            Self::Create { user } => DaemonRequest::Create { user },
            Self::Invite { user, target } => DaemonRequest::Invite { user, target },
            Self::Accept { user, inviter } => DaemonRequest::Accept { user, inviter },
            Self::Decline { user, inviter } => DaemonRequest::Decline { user, inviter },
            Self::Join { user, target } => DaemonRequest::Join { user, target },
            Self::Kick { user, target } => DaemonRequest::Kick { user, target },
            Self::Promote { user, target } => DaemonRequest::Promote { user, target },
            Self::Leave { user } => DaemonRequest::Leave { user },
            Self::Disband { user } => DaemonRequest::Disband { user },
            Self::Public { user, state } => DaemonRequest::Public {
                user,
                enabled: state == Toggle::On,
            },
            Self::Summon { user } => DaemonRequest::Summon { user },
            Self::List { user } => DaemonRequest::List { user },
            Self::Notices { user } => DaemonRequest::Notices { user },
        }
    }
}

pub fn run(command: PartyCommand) -> Result<()> {
    let home = super::home_dir()?;
    let request_body = command.into_request();
    let verb = request_body.name();

    let data = request(&home, &request_body).with_context(|| format!("{verb} refused"))?;
    println!("{}", describe(verb, &data)?);
    Ok(())
}

fn field<'a>(data: &'a Value, key: &str) -> &'a str {
    data[key].as_str().unwrap_or("?")
}

fn describe(verb: &str, data: &Value) -> Result<String> {
    let line = match verb {
        "create" => format!("party {} created", field(data, "party")),
        "invite" => {
            let invited = format!("invited {} (expires in 60s)", field(data, "invitee"));
            if data["created"].as_bool().unwrap_or(false) {
                format!("party {} created; {invited}", field(data, "party"))
            } else {
                invited
            }
        }
        "accept" | "join" => format!("joined party {}", field(data, "party")),
        "decline" => format!("declined invite to party {}", field(data, "party")),
        "kick" => format!("kicked {}", field(data, "kicked")),
        "promote" => format!(
            "{} promoted to {}",
            field(data, "target"),
            field(data, "promotion")
        ),
        "leave" => match field(data, "removal") {
            "disbanded" => "left party; it was disbanded".to_string(),
            _ => "left party".to_string(),
        },
        "disband" => format!("party {} disbanded", field(data, "party")),
        "public" => {
            let state = if data["public"].as_bool().unwrap_or(false) {
                "public"
            } else {
                "private"
            };
            format!("party {} is now {state}", field(data, "party"))
        }
        "summon" => {
            let members: Vec<&str> = data["members"]
                .as_array()
                .map(|all| all.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            format!(
                "summoned {} member(s) to {}: {}",
                members.len(),
                field(data, "backend"),
                members.join(", ")
            )
        }
        _ => serde_json::to_string_pretty(data).context("failed to render response JSON")?,
    };
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invite_mentions_created_party() {
        let data = json!({ "party": "p1", "created": true, "invitee": "bo" });
        assert_eq!(
            describe("invite", &data).unwrap(),
            "party p1 created; invited bo (expires in 60s)"
        );
    }

    #[test]
    fn summon_lists_members() {
        let data = json!({ "backend": "lobby", "members": ["bo", "cy"] });
        assert_eq!(
            describe("summon", &data).unwrap(),
            "summoned 2 member(s) to lobby: bo, cy"
        );
    }

    #[test]
    fn list_falls_back_to_json() {
        let data = json!({ "leader": "ann" });
        assert!(describe("list", &data).unwrap().contains("\"leader\": \"ann\""));
    }

    #[test]
    fn public_toggle_maps_to_flag() {
        let request = PartyCommand::Public {
            user: "ann".into(),
            state: Toggle::Off,
        }
        .into_request();
        assert_eq!(
            request,
            DaemonRequest::Public {
                user: "ann".into(),
                enabled: false
            }
        );
    }
}
