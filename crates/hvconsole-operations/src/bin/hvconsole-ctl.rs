// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! hvconsole Control CLI
//!
//! CLI tool for tracking operations on the management daemon.
//!
//! Usage:
//!   hvconsole-ctl <command> [options]
//!
//! Commands:
//!   info                          Show server details
//!   operations                    List operations
//!   operation <id>                Show one operation
//!   cancel <id>                   Cancel an operation
//!   wait <id> [--poll <ms>]       Wait for an operation to finish
//!   delete <instance>...          Delete instances
//!   start|stop|restart <instance>... [--force] [--timeout <s>]
//!   freeze|unfreeze <instance>...

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use hvconsole_operations::{
    BulkAction, ConsoleClient, ConsoleConfig, OperationOutcome, OperationPoller,
    OperationRegistry, run_bulk,
};
use tracing::warn;

fn print_usage() {
    eprintln!(
        r#"Usage: hvconsole-ctl <command> [options]

Track long-running operations on the management daemon.

COMMANDS:
    info                            Show server details
    operations                      List operations
    operation <id>                  Show one operation
    cancel <id>                     Cancel an operation
    wait <id>                       Wait for an operation to finish
    delete <instance>...            Delete instances
    start <instance>...             Start instances
    stop <instance>...              Stop instances
    restart <instance>...           Restart instances
    freeze <instance>...            Freeze instances
    unfreeze <instance>...          Unfreeze instances

WAIT OPTIONS:
    --poll <ms>                     Poll interval in ms (default: HVCONSOLE_POLL_INTERVAL_MS)

STATE OPTIONS (start, stop, restart, freeze, unfreeze):
    --force                         Force the transition
    --timeout <seconds>             Clean shutdown timeout

ENVIRONMENT:
    HVCONSOLE_API_URL               API URL (default: https://127.0.0.1:8443)
    HVCONSOLE_PROJECT               Project (default: all projects)
    HVCONSOLE_TOKEN                 Bearer token
    HVCONSOLE_SKIP_CERT_VERIFICATION  Skip TLS verification (default: false)
    HVCONSOLE_POLL_INTERVAL_MS      Operation poll interval (default: 1000)
    HVCONSOLE_ORPHAN_GRACE_MS       Orphaned operation grace period (default: 10000)

EXAMPLES:
    # Delete three instances and wait for all of them
    hvconsole-ctl delete web1 web2 db1

    # Force stop two instances
    hvconsole-ctl stop web1 web2 --force

    # Wait for an operation started elsewhere
    hvconsole-ctl wait 3f1c6a2e-0b0d-4d54-9d6f-2d9a9f2f4b10 --poll 250
"#
    );
}

#[derive(Debug)]
enum Command {
    Info,
    Operations,
    Operation {
        operation_id: String,
    },
    Cancel {
        operation_id: String,
    },
    Wait {
        operation_id: String,
        poll_ms: Option<u64>,
    },
    Bulk {
        action: BulkAction,
        instances: Vec<String>,
        force: bool,
        timeout: Option<i32>,
    },
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "info" => Ok(Command::Info),
        "operations" => Ok(Command::Operations),
        "operation" => {
            let operation_id = args.get(2).ok_or("Operation ID required")?.clone();
            Ok(Command::Operation { operation_id })
        }
        "cancel" => {
            let operation_id = args.get(2).ok_or("Operation ID required")?.clone();
            Ok(Command::Cancel { operation_id })
        }
        "wait" => {
            let operation_id = args.get(2).ok_or("Operation ID required")?.clone();
            let mut poll_ms: Option<u64> = None;

            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--poll" => {
                        i += 1;
                        poll_ms = Some(
                            args.get(i)
                                .ok_or("--poll requires a number")?
                                .parse()
                                .map_err(|_| "Invalid poll interval")?,
                        );
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            if poll_ms == Some(0) {
                return Err("Invalid poll interval".to_string());
            }

            Ok(Command::Wait {
                operation_id,
                poll_ms,
            })
        }
        verb => {
            let action =
                BulkAction::from_verb(verb).ok_or_else(|| format!("Unknown command: {}", verb))?;
            let mut instances = Vec::new();
            let mut force = false;
            let mut timeout: Option<i32> = None;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--force" if action != BulkAction::Delete => force = true,
                    "--timeout" if action != BulkAction::Delete => {
                        i += 1;
                        timeout = Some(
                            args.get(i)
                                .ok_or("--timeout requires a number")?
                                .parse()
                                .map_err(|_| "Invalid timeout")?,
                        );
                    }
                    arg if arg.starts_with("--") => {
                        return Err(format!("Unknown argument: {}", arg));
                    }
                    name => instances.push(name.to_string()),
                }
                i += 1;
            }

            if instances.is_empty() {
                return Err("At least one instance name required".to_string());
            }

            Ok(Command::Bulk {
                action,
                instances,
                force,
                timeout,
            })
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hvconsole_operations=warn".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let config = match ConsoleConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = match ConsoleClient::new(config) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match execute_command(client, cmd).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run a command. `Ok(false)` means the command ran but something it
/// tracked failed.
async fn execute_command(client: Arc<ConsoleClient>, cmd: Command) -> Result<bool, String> {
    match cmd {
        Command::Info => {
            let info = client.server_info().await.map_err(|e| e.to_string())?;
            print_json(&info)?;
        }

        Command::Operations => {
            let operations = client.list_operations().await.map_err(|e| e.to_string())?;
            print_json(&operations)?;
        }

        Command::Operation { operation_id } => {
            let operation = client
                .get_operation(&operation_id)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&operation)?;
        }

        Command::Cancel { operation_id } => {
            client
                .cancel_operation(&operation_id)
                .await
                .map_err(|e| e.to_string())?;
            println!("Cancellation requested for operation {}", operation_id);
        }

        Command::Wait {
            operation_id,
            poll_ms,
        } => {
            let interval = poll_ms
                .map(Duration::from_millis)
                .unwrap_or(client.config().poll_interval);
            let outcome = wait_for_operation(client, &operation_id, interval).await?;
            return Ok(match outcome {
                OperationOutcome::Success => {
                    println!("Operation {} succeeded", operation_id);
                    true
                }
                OperationOutcome::Failed(message) => {
                    eprintln!("Operation {} failed: {}", operation_id, message);
                    false
                }
            });
        }

        Command::Bulk {
            action,
            instances,
            force,
            timeout,
        } => {
            let registry = Arc::new(OperationRegistry::new());
            let mut poller = start_poller(&client, &registry, client.config().poll_interval)?;

            let result = run_bulk(&registry, &instances, |name| {
                let client = client.clone();
                let name = name.clone();
                async move { action.submit(&client, &name, force, timeout).await }
            })
            .await;

            poller.shutdown().await;
            registry.dispose();

            println!("{}", result.summary("instance", action.past_tense()));
            for (index, message) in result.rejections() {
                eprintln!("  {}: {}", instances[index], message);
            }
            return Ok(result.is_all_fulfilled());
        }
    }

    Ok(true)
}

fn start_poller(
    client: &Arc<ConsoleClient>,
    registry: &Arc<OperationRegistry>,
    interval: Duration,
) -> Result<OperationPoller, String> {
    let mut poller = OperationPoller::new(
        client.clone(),
        registry.clone(),
        client.config().poller_config(),
    );
    poller.start(interval).map_err(|e| e.to_string())?;
    Ok(poller)
}

async fn wait_for_operation(
    client: Arc<ConsoleClient>,
    operation_id: &str,
    interval: Duration,
) -> Result<OperationOutcome, String> {
    let registry = Arc::new(OperationRegistry::new());
    let (tx, rx) = tokio::sync::oneshot::channel();
    registry.register(operation_id, move |outcome| {
        let _ = tx.send(outcome);
    });

    let mut poller = start_poller(&client, &registry, interval)?;
    let outcome = rx.await;
    poller.shutdown().await;

    outcome.map_err(|_| {
        warn!(operation_id, "Registration dropped before completion");
        "operation tracking stopped before completion".to_string()
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).map_err(|e| e.to_string())?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper to create args vector from string slice
    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_no_command() {
        let result = parse_args_from_vec(&args(&["hvconsole-ctl"]));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("No command specified"));
    }

    #[test]
    fn test_parse_unknown_command() {
        let result = parse_args_from_vec(&args(&["hvconsole-ctl", "rebuild"]));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Unknown command"));
    }

    #[test]
    fn test_parse_info_and_operations() {
        assert!(matches!(
            parse_args_from_vec(&args(&["hvconsole-ctl", "info"])),
            Ok(Command::Info)
        ));
        assert!(matches!(
            parse_args_from_vec(&args(&["hvconsole-ctl", "operations"])),
            Ok(Command::Operations)
        ));
    }

    #[test]
    fn test_parse_operation_missing_id() {
        let result = parse_args_from_vec(&args(&["hvconsole-ctl", "operation"]));
        assert!(result.unwrap_err().contains("Operation ID required"));
    }

    #[test]
    fn test_parse_cancel() {
        match parse_args_from_vec(&args(&["hvconsole-ctl", "cancel", "op-1"])).unwrap() {
            Command::Cancel { operation_id } => assert_eq!(operation_id, "op-1"),
            _ => panic!("Expected Cancel command"),
        }
    }

    // ==========================================================================
    // parse_args_from_vec tests - Wait command
    // ==========================================================================

    #[test]
    fn test_parse_wait_default() {
        match parse_args_from_vec(&args(&["hvconsole-ctl", "wait", "op-1"])).unwrap() {
            Command::Wait {
                operation_id,
                poll_ms,
            } => {
                assert_eq!(operation_id, "op-1");
                assert!(poll_ms.is_none());
            }
            _ => panic!("Expected Wait command"),
        }
    }

    #[test]
    fn test_parse_wait_custom_poll() {
        match parse_args_from_vec(&args(&["hvconsole-ctl", "wait", "op-1", "--poll", "250"]))
            .unwrap()
        {
            Command::Wait { poll_ms, .. } => assert_eq!(poll_ms, Some(250)),
            _ => panic!("Expected Wait command"),
        }
    }

    #[test]
    fn test_parse_wait_invalid_poll() {
        let result =
            parse_args_from_vec(&args(&["hvconsole-ctl", "wait", "op-1", "--poll", "abc"]));
        assert!(result.unwrap_err().contains("Invalid poll interval"));

        let result = parse_args_from_vec(&args(&["hvconsole-ctl", "wait", "op-1", "--poll", "0"]));
        assert!(result.unwrap_err().contains("Invalid poll interval"));
    }

    // ==========================================================================
    // parse_args_from_vec tests - Bulk commands
    // ==========================================================================

    #[test]
    fn test_parse_bulk_delete() {
        match parse_args_from_vec(&args(&["hvconsole-ctl", "delete", "web1", "web2"])).unwrap() {
            Command::Bulk {
                action,
                instances,
                force,
                timeout,
            } => {
                assert_eq!(action, BulkAction::Delete);
                assert_eq!(instances, vec!["web1".to_string(), "web2".to_string()]);
                assert!(!force);
                assert!(timeout.is_none());
            }
            _ => panic!("Expected Bulk command"),
        }
    }

    #[test]
    fn test_parse_bulk_stop_with_options() {
        match parse_args_from_vec(&args(&[
            "hvconsole-ctl",
            "stop",
            "web1",
            "--force",
            "--timeout",
            "30",
            "db1",
        ]))
        .unwrap()
        {
            Command::Bulk {
                action,
                instances,
                force,
                timeout,
            } => {
                assert_eq!(action, BulkAction::Stop);
                assert_eq!(instances, vec!["web1".to_string(), "db1".to_string()]);
                assert!(force);
                assert_eq!(timeout, Some(30));
            }
            _ => panic!("Expected Bulk command"),
        }
    }

    #[test]
    fn test_parse_delete_rejects_force() {
        let result = parse_args_from_vec(&args(&["hvconsole-ctl", "delete", "web1", "--force"]));
        assert!(result.unwrap_err().contains("Unknown argument: --force"));
    }

    #[test]
    fn test_parse_bulk_requires_instances() {
        let result = parse_args_from_vec(&args(&["hvconsole-ctl", "restart", "--force"]));
        assert!(result.unwrap_err().contains("At least one instance name required"));
    }

    #[test]
    fn test_parse_bulk_invalid_timeout() {
        let result = parse_args_from_vec(&args(&[
            "hvconsole-ctl",
            "start",
            "web1",
            "--timeout",
            "soon",
        ]));
        assert!(result.unwrap_err().contains("Invalid timeout"));
    }
}
