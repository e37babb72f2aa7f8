use anyhow::Result;

use tessera_core::contract::catalog;

/// Print every stage contract with its fields and rules.
pub fn run() -> Result<bool> {
    for contract in catalog::all() {
        println!("{}", contract.name());
        for field in contract.fields() {
            let need = if field.required { "required" } else { "optional" };
            println!("  {:<18} {:<9} {}", field.name, need, field.rule.describe());
        }
        for artifact in contract.artifacts() {
            println!("  @{:<17} {:<9} {}", artifact.name, "artifact", artifact.rule.describe());
        }
        println!();
    }
    Ok(true)
}
