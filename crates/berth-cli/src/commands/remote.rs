use std::io::Write;
use std::process::Command;

use berth_provision::Selector;
use tracing::info;

use super::Context;

/// Hand the terminal to the system `ssh` client. Returns its exit code.
pub fn ssh(ctx: &Context, selector: &Selector) -> anyhow::Result<i32> {
    let transport = ctx.operator.ssh(selector)?;
    let target = transport.target();
    info!(host = %target.host, user = %target.user, "opening shell");
    let status = Command::new("ssh").args(transport.ssh_args(None)).status()?;
    drop(transport);
    Ok(status.code().unwrap_or(1))
}

/// Run `command` in a container and mirror its output. Returns its exit code.
pub fn exec(
    ctx: &Context,
    selector: &Selector,
    process: &str,
    command: &str,
    session: Option<&str>,
) -> anyhow::Result<i32> {
    let output = ctx.operator.exec(selector, process, command, session)?;
    std::io::stdout().write_all(output.stdout.as_bytes())?;
    std::io::stderr().write_all(output.stderr.as_bytes())?;
    Ok(output.exit_code)
}

pub fn scale(ctx: &Context, environment: Option<&str>, process: &str, replicas: u32) -> anyhow::Result<()> {
    ctx.operator.scale(environment, process, replicas)?;
    println!("{process} scaled to {replicas}");
    Ok(())
}

pub fn restart(ctx: &Context, environment: Option<&str>, process: &str) -> anyhow::Result<()> {
    ctx.operator.restart(environment, process)?;
    println!("{process} restarting");
    Ok(())
}
