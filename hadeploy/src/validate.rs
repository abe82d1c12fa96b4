use crate::error::Error;
use crate::models::HostTarget;
use crate::Result;

const USERNAME_MAX_LEN: usize = 32;

/// Dotted-quad IPv4 check: exactly four segments, each a plain decimal in
/// 0..=255. No network lookup is involved.
pub fn is_valid_ip(ip: &str) -> bool {
    let ip = ip.trim();
    if ip.is_empty() {
        return false;
    }

    let segments: Vec<&str> = ip.split('.').collect();
    if segments.len() != 4 {
        return false;
    }

    segments.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}

pub fn validate_ip(ip: &str) -> Result<()> {
    if ip.trim().is_empty() {
        return Err(Error::validation("ip", "IP address must not be empty"));
    }
    if !is_valid_ip(ip) {
        return Err(Error::validation(
            "ip",
            "malformed IP address, expected a valid IPv4 dotted quad",
        ));
    }
    Ok(())
}

pub fn is_valid_username(username: &str) -> bool {
    let username = username.trim();
    !username.is_empty()
        && username.len() <= USERNAME_MAX_LEN
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(Error::validation("username", "username must not be empty"));
    }
    if !is_valid_username(username) {
        return Err(Error::validation(
            "username",
            "username may only contain letters, digits, underscore and hyphen, 1-32 characters",
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::validation("password", "password must not be empty"));
    }
    Ok(())
}

pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(Error::validation("sshPort", "port must be in 1-65535"));
    }
    Ok(())
}

pub fn validate_timeout(timeout_ms: u64) -> Result<()> {
    if timeout_ms == 0 {
        return Err(Error::validation("timeout", "timeout must be greater than 0"));
    }
    Ok(())
}

/// Full pre-flight validation of one host target. Runs before any network
/// activity; the first offending field aborts.
pub fn validate_target(target: &HostTarget) -> Result<()> {
    validate_ip(&target.ip)?;
    validate_username(&target.username)?;
    validate_password(&target.password)?;
    validate_port(target.ssh_port)?;
    validate_timeout(target.timeout_ms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_dotted_quads() {
        for ip in [
            "0.0.0.0",
            "127.0.0.1",
            "192.168.10.101",
            "255.255.255.255",
            "10.0.0.1",
            " 172.16.4.20 ",
        ] {
            assert!(is_valid_ip(ip), "{ip} should be accepted");
        }
    }

    #[test]
    fn rejects_malformed_ips() {
        for ip in [
            "",
            "256.0.0.1",
            "192.168.1",
            "192.168.1.1.1",
            "a.b.c.d",
            "192.168.1.-1",
            "192.168.1.+1",
            "1921.68.1.1",
            "192 .168.1.1",
            "...",
        ] {
            assert!(!is_valid_ip(ip), "{ip} should be rejected");
        }
    }

    #[test]
    fn username_rules() {
        assert!(is_valid_username("hadoop"));
        assert!(is_valid_username("deploy_user-01"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username("way_too_long_name_that_exceeds_the_limit"));
    }

    #[test]
    fn target_validation_names_the_offending_field() {
        let mut target = HostTarget {
            index: 1,
            ip: "192.168.10.101".into(),
            hostname: "hadoop101".into(),
            username: "hadoop".into(),
            password: "secret".into(),
            ssh_port: 22,
            timeout_ms: 30_000,
        };
        assert!(validate_target(&target).is_ok());

        target.ip = "999.1.1.1".into();
        match validate_target(&target) {
            Err(Error::Validation { field, .. }) => assert_eq!(field, "ip"),
            other => panic!("expected validation error, got {other:?}"),
        }

        target.ip = "192.168.10.101".into();
        target.password.clear();
        match validate_target(&target) {
            Err(Error::Validation { field, .. }) => assert_eq!(field, "password"),
            other => panic!("expected validation error, got {other:?}"),
        }

        target.password = "secret".into();
        target.ssh_port = 0;
        assert!(validate_target(&target).is_err());

        target.ssh_port = 22;
        target.timeout_ms = 0;
        assert!(validate_target(&target).is_err());
    }
}
