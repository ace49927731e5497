use crate::types::{SessionTopology, Vec3};

const WORLD_BORDER: f64 = 30_000_000.0;

pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Player".to_string();
    }
    trimmed.chars().take(16).collect()
}

/// Clamps horizontal axes to the world border and the vertical axis to build limits.
pub fn sanitize_position(position: Vec3) -> Vec3 {
    Vec3::new(
        position.x.clamp(-WORLD_BORDER, WORLD_BORDER),
        position.y.clamp(-64.0, 320.0),
        position.z.clamp(-WORLD_BORDER, WORLD_BORDER),
    )
}

pub fn parse_topology(raw: Option<&str>) -> SessionTopology {
    raw.and_then(SessionTopology::parse)
        .unwrap_or(SessionTopology::Dedicated)
}

pub fn parse_port(raw: Option<&str>) -> u16 {
    raw.and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(8080)
}

pub fn player_order_key(player_id: &str) -> u64 {
    player_id
        .rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse::<u64>().ok())
        .unwrap_or(u64::MAX)
}

/// Admin commands are refused unless a token is configured and matches.
pub fn admin_token_matches(configured: Option<&str>, presented: &str) -> bool {
    match configured.map(str::trim) {
        Some(expected) if !expected.is_empty() => expected == presented.trim(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_order_key_uses_numeric_suffix() {
        assert!(player_order_key("player_2") < player_order_key("player_10"));
        assert_eq!(player_order_key("nobody"), u64::MAX);
    }

    #[test]
    fn sanitize_name_applies_trim_empty_and_max_len() {
        assert_eq!(sanitize_name(""), "Player");
        assert_eq!(sanitize_name("   "), "Player");
        assert_eq!(sanitize_name(" Alice "), "Alice");
        assert_eq!(sanitize_name("12345678901234567890"), "1234567890123456");
    }

    #[test]
    fn sanitize_position_clamps_axes() {
        let clamped = sanitize_position(Vec3::new(4.0e7, 900.0, -4.0e7));
        assert_eq!(clamped, Vec3::new(WORLD_BORDER, 320.0, -WORLD_BORDER));
    }

    #[test]
    fn topology_defaults_to_dedicated() {
        assert_eq!(parse_topology(None), SessionTopology::Dedicated);
        assert_eq!(parse_topology(Some("LOCAL")), SessionTopology::Local);
        assert_eq!(parse_topology(Some("lan")), SessionTopology::Dedicated);
    }

    #[test]
    fn port_parsing_is_lenient() {
        assert_eq!(parse_port(Some("9000")), 9000);
        assert_eq!(parse_port(Some("abc")), 8080);
        assert_eq!(parse_port(None), 8080);
    }

    #[test]
    fn admin_token_requires_configuration() {
        assert!(!admin_token_matches(None, "secret"));
        assert!(!admin_token_matches(Some(""), ""));
        assert!(!admin_token_matches(Some("secret"), "guess"));
        assert!(admin_token_matches(Some("secret"), " secret "));
    }
}
