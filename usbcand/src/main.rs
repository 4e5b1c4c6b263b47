mod backend;
mod config;
mod gateway;
mod listen;
mod tools;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches};
use usbcan_proto::ProtocolConfig;

use crate::config::{Config, Host, DEFAULT_BAUD};
use crate::tools::Endpoint;

fn args() -> clap::Command {
    clap::command!()
        .subcommand_required(true)
        .arg(
            Arg::new("serial")
                .short('s')
                .long("serial")
                .global(true)
                .action(ArgAction::Set)
                .help("Serial port of the host link"),
        )
        .arg(
            Arg::new("baud")
                .short('b')
                .long("baud")
                .global(true)
                .action(ArgAction::Set)
                .value_parser(value_parser!(u32))
                .default_value("115200"),
        )
        .subcommand(
            clap::Command::new("gateway")
                .about("Bridge a host link to a SocketCAN interface")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("interface")
                        .short('i')
                        .long("interface")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("listen")
                        .short('l')
                        .long("listen")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(SocketAddr))
                        .help("Serve hosts over TCP instead of a serial port"),
                )
                .arg(
                    Arg::new("manage-link")
                        .long("manage-link")
                        .action(ArgAction::SetTrue)
                        .help("Apply bitrate and listen-only mode with `ip link`"),
                ),
        )
        .subcommand(
            clap::Command::new("monitor")
                .about("Print everything a gateway sends")
                .arg(connect_arg()),
        )
        .subcommand(
            clap::Command::new("send")
                .about("Put a frame on the bus")
                .arg(connect_arg())
                .arg(Arg::new("id").required(true).action(ArgAction::Set))
                .arg(
                    Arg::new("payload")
                        .action(ArgAction::Set)
                        .default_value("")
                        .help("Payload as hex, up to 8 bytes"),
                )
                .arg(
                    Arg::new("extended")
                        .short('e')
                        .long("extended")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            clap::Command::new("configure")
                .about("Configure the gateway")
                .arg(connect_arg())
                .arg(
                    Arg::new("bitrate")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(u32))
                        .default_value("250000"),
                )
                .arg(
                    Arg::new("filter-id")
                        .long("filter-id")
                        .action(ArgAction::Set)
                        .value_parser(tools::parse_number)
                        .default_value("0"),
                )
                .arg(
                    Arg::new("filter-mask")
                        .long("filter-mask")
                        .action(ArgAction::Set)
                        .value_parser(tools::parse_number)
                        .default_value("0"),
                )
                .arg(
                    Arg::new("no-terminator")
                        .long("no-terminator")
                        .action(ArgAction::SetTrue),
                )
                .arg(Arg::new("silent").long("silent").action(ArgAction::SetTrue))
                .arg(
                    Arg::new("error-reports")
                        .long("error-reports")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("legacy")
                        .long("legacy")
                        .action(ArgAction::SetTrue)
                        .help("Use the 20 byte configuration packet"),
                ),
        )
        .subcommand(
            clap::Command::new("status")
                .about("Query the gateway's error counters")
                .arg(connect_arg()),
        )
}

fn connect_arg() -> Arg {
    Arg::new("connect")
        .long("connect")
        .action(ArgAction::Set)
        .help("Reach the gateway over TCP, e.g. gateway:2342")
}

fn gateway_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let interface = matches.get_one::<String>("interface").cloned();
    let baud = *matches.get_one::<u32>("baud").unwrap_or(&DEFAULT_BAUD);
    let host = match (
        matches.get_one::<String>("serial"),
        matches.get_one::<SocketAddr>("listen"),
    ) {
        (Some(path), _) => Some(Host::Serial {
            path: PathBuf::from(path),
            baud,
        }),
        (None, Some(addr)) => Some(Host::Tcp { bind: *addr }),
        (None, None) => None,
    };

    // Flags win over the file.
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            let mut config = Config::load(path)?;
            if let Some(interface) = interface {
                config.bus.interface = interface;
            }
            if let Some(host) = host {
                config.host = host;
            }
            config
        }
        None => Config {
            bus: config::Bus {
                interface: interface.context("No CAN interface given")?,
                manage_link: false,
            },
            host: host.context("Neither a serial port nor a listen address given")?,
        },
    };
    config.bus.manage_link |= matches.get_flag("manage-link");

    Ok(config)
}

fn endpoint(matches: &ArgMatches) -> anyhow::Result<Endpoint> {
    if let Some(addr) = matches.get_one::<String>("connect") {
        return Ok(Endpoint::Tcp(addr.clone()));
    }
    let path = matches
        .get_one::<String>("serial")
        .context("Either --serial or --connect is needed")?;
    Ok(Endpoint::Serial {
        path: path.clone(),
        baud: *matches.get_one::<u32>("baud").unwrap_or(&DEFAULT_BAUD),
    })
}

fn protocol_config(matches: &ArgMatches) -> ProtocolConfig {
    ProtocolConfig {
        bitrate: *matches.get_one::<u32>("bitrate").unwrap_or(&250_000),
        filter_id: *matches.get_one::<u32>("filter-id").unwrap_or(&0),
        filter_mask: *matches.get_one::<u32>("filter-mask").unwrap_or(&0),
        terminator: !matches.get_flag("no-terminator"),
        silent: matches.get_flag("silent"),
        error_reporting: matches.get_flag("error-reports"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let matches = args().get_matches();

    let (command, submatches) = match matches.subcommand() {
        Some(subcommand) => subcommand,
        None => anyhow::bail!("No command given"),
    };

    if command == "gateway" {
        return listen::run(gateway_config(submatches)?).await;
    }

    let mut conn = tools::connect(&endpoint(submatches)?).await?;
    match command {
        "monitor" => tools::monitor(&mut conn).await,
        "send" => {
            let frame = tools::parse_frame(
                submatches.get_one::<String>("id").context("No identifier")?,
                submatches
                    .get_one::<String>("payload")
                    .map(String::as_str)
                    .unwrap_or(""),
                submatches.get_flag("extended"),
            )?;
            tools::send(&mut conn, frame).await
        }
        "configure" => {
            tools::configure(
                &mut conn,
                protocol_config(submatches),
                submatches.get_flag("legacy"),
            )
            .await
        }
        "status" => tools::status(&mut conn).await,
        other => anyhow::bail!("Unknown command {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_are_consistent() {
        args().debug_assert();
    }

    #[test]
    fn test_gateway_from_flags() {
        let matches = args()
            .try_get_matches_from(["usbcand", "gateway", "-i", "can1", "--listen", "[::1]:2342"])
            .unwrap();
        let (_, submatches) = matches.subcommand().unwrap();
        let config = gateway_config(submatches).unwrap();

        assert_eq!(config.bus.interface, "can1");
        assert!(!config.bus.manage_link);
        assert_eq!(
            config.host,
            Host::Tcp {
                bind: "[::1]:2342".parse().unwrap()
            }
        );
    }

    #[test]
    fn test_gateway_needs_a_host_link() {
        let matches = args()
            .try_get_matches_from(["usbcand", "gateway", "-i", "can1"])
            .unwrap();
        let (_, submatches) = matches.subcommand().unwrap();
        assert!(gateway_config(submatches).is_err());
    }

    #[test]
    fn test_configure_flags() {
        let matches = args()
            .try_get_matches_from([
                "usbcand",
                "configure",
                "--connect",
                "gw:2342",
                "500000",
                "--filter-id",
                "0x100",
                "--filter-mask",
                "0x700",
                "--silent",
            ])
            .unwrap();
        let (_, submatches) = matches.subcommand().unwrap();

        assert_eq!(
            protocol_config(submatches),
            ProtocolConfig {
                bitrate: 500_000,
                filter_id: 0x100,
                filter_mask: 0x700,
                terminator: true,
                silent: true,
                error_reporting: false,
            }
        );
        assert!(matches!(endpoint(submatches).unwrap(), Endpoint::Tcp(addr) if addr == "gw:2342"));
    }
}
