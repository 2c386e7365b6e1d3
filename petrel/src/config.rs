//! Startup validation of the polling configuration.
//!
//! Hard errors (unknown strategy, out-of-range lease parameters, zero
//! batch/concurrency) reject the process before any store is touched; soft
//! mismatches (settings that the chosen strategy ignores) come back as
//! warning strings for the caller to log.

use std::str::FromStr;

use petrel_tracking::TrackingStrategy;

use crate::{
    dev::DevArgs,
    error::{InvalidConfigurationSnafu, Result},
};

/// Store-imposed bounds on the lease duration, in seconds.
pub const MIN_LEASE_SECONDS: u64 = 15;
pub const MAX_LEASE_SECONDS: u64 = 60;

pub fn validate(args: &DevArgs) -> Result<(TrackingStrategy, Vec<String>)> {
    let strategy = TrackingStrategy::from_str(&args.tracking_strategy).map_err(|_| {
        InvalidConfigurationSnafu {
            message: format!(
                "invalid tracking_strategy '{}', valid values: tags, container, registry",
                args.tracking_strategy
            ),
        }
        .build()
    })?;

    if !(MIN_LEASE_SECONDS..=MAX_LEASE_SECONDS).contains(&args.lease_duration) {
        return InvalidConfigurationSnafu {
            message: format!(
                "lease_duration must be between {MIN_LEASE_SECONDS} and {MAX_LEASE_SECONDS} \
                 seconds, got {}",
                args.lease_duration
            ),
        }
        .fail();
    }

    if args.lease_renewal == 0 || args.lease_renewal >= args.lease_duration {
        return InvalidConfigurationSnafu {
            message: format!(
                "lease_renewal must be between 1 and lease_duration - 1 seconds, got {}",
                args.lease_renewal
            ),
        }
        .fail();
    }

    if args.blob_batch_size == 0 {
        return InvalidConfigurationSnafu {
            message: "blob_batch_size must be at least 1",
        }
        .fail();
    }

    if args.concurrency == 0 {
        return InvalidConfigurationSnafu {
            message: "concurrency must be at least 1",
        }
        .fail();
    }

    if args.poll_interval == 0 {
        return InvalidConfigurationSnafu {
            message: "poll_interval must be at least 1 second",
        }
        .fail();
    }

    let mut warnings = Vec::new();
    if strategy != TrackingStrategy::Container {
        if args.archive_container.is_some() {
            warnings.push(format!(
                "archive_container is configured but will be ignored because \
                 tracking_strategy is '{strategy}'"
            ));
        }
        if args.error_container.is_some() {
            warnings.push(format!(
                "error_container is configured but will be ignored because \
                 tracking_strategy is '{strategy}'"
            ));
        }
    }
    if strategy != TrackingStrategy::Registry && args.registry_path.is_some() {
        warnings.push(format!(
            "registry_path is configured but will be ignored because \
             tracking_strategy is '{strategy}'"
        ));
    }
    if strategy == TrackingStrategy::Registry {
        warnings.push("lease coordination is not used with the registry strategy".to_string());
    }

    Ok((strategy, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::CliError;

    fn base_args() -> DevArgs {
        DevArgs {
            container: "logs".to_string(),
            storage_account: "devstore".to_string(),
            tracking_strategy: "tags".to_string(),
            prefix: None,
            blob_batch_size: 10,
            concurrency: 1,
            poll_interval: 5,
            lease_duration: 30,
            lease_renewal: 20,
            skip_empty_lines: true,
            processor_id: None,
            archive_container: None,
            error_container: None,
            registry_path: None,
            seed: Vec::new(),
            cycles: None,
        }
    }

    fn expect_configuration_error(args: DevArgs) -> String {
        match validate(&args) {
            Err(CliError::InvalidConfiguration { message }) => message,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_defaults() {
        let (strategy, warnings) = validate(&base_args()).expect("valid config");
        assert_eq!(strategy, TrackingStrategy::Tags);
        assert!(warnings.is_empty());
    }

    #[test]
    fn rejects_unknown_strategy() {
        let mut args = base_args();
        args.tracking_strategy = "etcd".to_string();
        let message = expect_configuration_error(args);
        assert!(message.contains("etcd"));
    }

    #[test]
    fn rejects_lease_duration_out_of_range() {
        for duration in [14, 61] {
            let mut args = base_args();
            args.lease_duration = duration;
            args.lease_renewal = 10;
            let message = expect_configuration_error(args);
            assert!(message.contains("lease_duration"));
        }
    }

    #[test]
    fn rejects_renewal_not_below_duration() {
        let mut args = base_args();
        args.lease_renewal = args.lease_duration;
        let message = expect_configuration_error(args);
        assert!(message.contains("lease_renewal"));
    }

    #[test]
    fn rejects_zero_batch_and_concurrency() {
        let mut args = base_args();
        args.blob_batch_size = 0;
        expect_configuration_error(args);

        let mut args = base_args();
        args.concurrency = 0;
        expect_configuration_error(args);
    }

    #[test]
    fn warns_about_settings_the_strategy_ignores() {
        let mut args = base_args();
        args.archive_container = Some("archive".to_string());
        args.registry_path = Some("state.db".into());
        let (_, warnings) = validate(&args).expect("valid config");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("archive_container"));
        assert!(warnings[1].contains("registry_path"));
    }

    #[test]
    fn registry_strategy_notes_unused_leases() {
        let mut args = base_args();
        args.tracking_strategy = "registry".to_string();
        let (strategy, warnings) = validate(&args).expect("valid config");
        assert_eq!(strategy, TrackingStrategy::Registry);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("lease coordination"));
    }
}
