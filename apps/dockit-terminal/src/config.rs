use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use exec_bridge::{CommandSpec, RuntimeConfig};

use crate::gate::GateConfig;

#[derive(Debug, Parser)]
#[command(
    name = "dockit-terminal",
    author,
    version,
    about = "Attach websocket terminals to container exec sessions"
)]
pub struct Cli {
    /// Address to bind the websocket listener to.
    #[arg(long, env = "DOCKIT_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// Container runtime API as host:port.
    #[arg(long, env = "DOCKIT_RUNTIME_HOST", default_value = "127.0.0.1:2375")]
    pub runtime_host: String,

    /// Only allow exec sessions into this resource.
    #[arg(long, env = "DOCKIT_RESOURCE_ID")]
    pub resource_id: Option<String>,

    /// Command run inside every exec session.
    #[arg(
        long = "exec-cmd",
        env = "DOCKIT_EXEC_CMD",
        value_delimiter = ' ',
        default_value = "/bin/bash"
    )]
    pub exec_cmd: Vec<String>,

    /// User-Agent sent on the attach request.
    #[arg(long, env = "DOCKIT_CLIENT_IDENTITY", default_value = "Docker-Client")]
    pub client_identity: String,

    /// Program deciding whether a session token may open a resource. It is
    /// called as `<program> <args..> <resource_id> <token>`; exit 0 allows.
    #[arg(long, env = "DOCKIT_AUTH_PROGRAM")]
    pub auth_program: Option<String>,

    /// Extra leading arguments for the auth program.
    #[arg(long = "auth-arg", env = "DOCKIT_AUTH_ARGS", value_delimiter = ' ')]
    pub auth_args: Vec<String>,

    /// Skip authorization entirely (development only).
    #[arg(long, env = "DOCKIT_DISABLE_AUTH", default_value_t = false)]
    pub disable_auth: bool,

    /// Grace period applied during shutdown.
    #[arg(long, env = "DOCKIT_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub runtime: RuntimeConfig,
    pub pinned_resource: Option<String>,
    pub gate: GateConfig,
    pub shutdown_grace: Duration,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;

        if cli.runtime_host.trim().is_empty() {
            bail!("runtime host must not be empty");
        }

        let exec_cmd: Vec<String> = cli
            .exec_cmd
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect();
        if exec_cmd.is_empty() {
            bail!("exec command must not be empty");
        }

        let gate = match (cli.auth_program, cli.disable_auth) {
            (_, true) => GateConfig::Disabled,
            (Some(program), false) => GateConfig::Command {
                program,
                args: cli.auth_args,
            },
            (None, false) => {
                bail!("either --auth-program or --disable-auth must be given")
            }
        };

        let pinned_resource = cli.resource_id.filter(|id| !id.is_empty());

        let mut runtime = RuntimeConfig::new(cli.runtime_host);
        runtime.client_identity = cli.client_identity;
        runtime.command = CommandSpec::interactive_shell(exec_cmd);

        Ok(ServerConfig {
            listen_addr,
            runtime,
            pinned_resource,
            gate,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}
