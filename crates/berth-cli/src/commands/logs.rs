use berth_provision::Selector;
use berth_provision::ops::render_ledger;

use super::Context;

pub fn show(ctx: &Context, selector: &Selector, failed_only: bool) -> anyhow::Result<()> {
    let entries = ctx.operator.logs(selector, failed_only)?;
    if entries.is_empty() {
        println!("no executions recorded");
    } else {
        print!("{}", render_ledger(&entries));
    }
    Ok(())
}
