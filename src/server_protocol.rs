use serde_json::{Map, Value};

use crate::types::{DamageCause, GameRole, PlayerAction, Vec3};

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Hello {
        name: String,
        reconnect_token: Option<String>,
        position: Option<Vec3>,
    },
    Move {
        position: Vec3,
    },
    Gesture {
        helping: bool,
    },
    Action {
        action: PlayerAction,
    },
    CinematicDone,
    Respawn,
    /// Reported by whatever owns damage: the hit that would have killed the sender.
    LethalHit {
        cause: DamageCause,
    },
    AdminRole {
        target_id: String,
        role: GameRole,
        token: String,
    },
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "hello" => {
            let name = object.get("name")?.as_str()?.to_string();
            let reconnect_token = match object.get("reconnectToken") {
                None => None,
                Some(value) => Some(value.as_str()?.to_string()),
            };
            let position = match object.get("position") {
                None => None,
                Some(value) => Some(parse_position(value.as_object()?)?),
            };
            Some(ParsedClientMessage::Hello {
                name,
                reconnect_token,
                position,
            })
        }
        "move" => Some(ParsedClientMessage::Move {
            position: parse_position(object)?,
        }),
        "gesture" => {
            let helping = object.get("helping")?.as_bool()?;
            Some(ParsedClientMessage::Gesture { helping })
        }
        "action" => {
            let action = parse_action(object.get("kind")?.as_str()?)?;
            Some(ParsedClientMessage::Action { action })
        }
        "cinematic_done" => Some(ParsedClientMessage::CinematicDone),
        "respawn" => Some(ParsedClientMessage::Respawn),
        "lethal_hit" => {
            let cause = match object.get("cause")?.as_str()? {
                "attacker" => {
                    let attacker_id = object.get("attackerId")?.as_str()?.trim();
                    if attacker_id.is_empty() {
                        return None;
                    }
                    DamageCause::Attacker {
                        attacker_id: attacker_id.to_string(),
                    }
                }
                "out_of_world" => DamageCause::OutOfWorld,
                "command" => DamageCause::Command,
                "other" => DamageCause::Other,
                _ => return None,
            };
            Some(ParsedClientMessage::LethalHit { cause })
        }
        "admin_role" => {
            let target_id = object.get("targetId")?.as_str()?.to_string();
            let role = GameRole::parse(object.get("role")?.as_str()?)?;
            let token = object.get("token")?.as_str()?.to_string();
            Some(ParsedClientMessage::AdminRole {
                target_id,
                role,
                token,
            })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_position(object: &Map<String, Value>) -> Option<Vec3> {
    let x = object.get("x")?.as_f64()?;
    let y = object.get("y")?.as_f64()?;
    let z = object.get("z")?.as_f64()?;
    if !x.is_finite() || !y.is_finite() || !z.is_finite() {
        return None;
    }
    Some(Vec3::new(x, y, z))
}

fn parse_action(raw: &str) -> Option<PlayerAction> {
    match raw {
        "melee" => Some(PlayerAction::Melee),
        "ranged_weapon" => Some(PlayerAction::RangedWeapon),
        "start_sprint" => Some(PlayerAction::StartSprint),
        "stop_sprint" => Some(PlayerAction::StopSprint),
        "jump" => Some(PlayerAction::Jump),
        "interact" => Some(PlayerAction::Interact),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hello_message() {
        let parsed = parse_client_message(
            r#"{"type":"hello","name":"A","position":{"x":1,"y":64.5,"z":-2}}"#,
        )
        .expect("hello message should parse");
        assert_eq!(
            parsed,
            ParsedClientMessage::Hello {
                name: "A".to_string(),
                reconnect_token: None,
                position: Some(Vec3::new(1.0, 64.5, -2.0)),
            }
        );
    }

    #[test]
    fn parse_move_requires_all_axes() {
        assert!(parse_client_message(r#"{"type":"move","x":1,"y":2}"#).is_none());
        assert!(matches!(
            parse_client_message(r#"{"type":"move","x":1,"y":2,"z":3}"#),
            Some(ParsedClientMessage::Move { .. })
        ));
    }

    #[test]
    fn parse_lethal_hit_causes() {
        assert_eq!(
            parse_client_message(r#"{"type":"lethal_hit","cause":"attacker","attackerId":"dread_1"}"#),
            Some(ParsedClientMessage::LethalHit {
                cause: DamageCause::Attacker {
                    attacker_id: "dread_1".to_string()
                }
            })
        );
        assert_eq!(
            parse_client_message(r#"{"type":"lethal_hit","cause":"out_of_world"}"#),
            Some(ParsedClientMessage::LethalHit {
                cause: DamageCause::OutOfWorld
            })
        );
        assert!(parse_client_message(r#"{"type":"lethal_hit","cause":"attacker"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"lethal_hit","cause":"lava"}"#).is_none());
    }

    #[test]
    fn parse_action_rejects_unknown_kind() {
        assert_eq!(
            parse_client_message(r#"{"type":"action","kind":"stop_sprint"}"#),
            Some(ParsedClientMessage::Action {
                action: PlayerAction::StopSprint
            })
        );
        assert!(parse_client_message(r#"{"type":"action","kind":"fly"}"#).is_none());
    }

    #[test]
    fn parse_admin_role_requires_known_role() {
        assert!(matches!(
            parse_client_message(
                r#"{"type":"admin_role","targetId":"player_1","role":"creative","token":"t"}"#
            ),
            Some(ParsedClientMessage::AdminRole {
                role: GameRole::Creative,
                ..
            })
        ));
        assert!(parse_client_message(
            r#"{"type":"admin_role","targetId":"player_1","role":"god","token":"t"}"#
        )
        .is_none());
    }

    #[test]
    fn parse_ping_requires_finite_number() {
        let parsed = parse_client_message(r#"{"type":"ping","t":12.5}"#);
        assert!(matches!(parsed, Some(ParsedClientMessage::Ping { .. })));
        assert!(parse_client_message(r#"{"type":"ping","t":"x"}"#).is_none());
    }
}
