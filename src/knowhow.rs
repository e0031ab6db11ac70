// ABOUTME: Operator acknowledgment gate for risky operations.
// ABOUTME: One shared function over any entity's special-instructions mapping.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

/// Entities that can carry operator instructions (applications and
/// transactions both expose their `knowhow.*` descriptor entries).
pub trait SpecialInstructions {
    fn special_instructions(&self) -> &BTreeMap<String, String>;
}

/// Ensure non-standard, project-specific operating instructions are known to
/// the operator before the given action proceeds.
///
/// `key` is the full instruction key, e.g. `knowhow.app.start`; the action
/// name shown to the operator is its last segment. With `pre_acknowledged`
/// the gate passes after a notice; otherwise the operator is prompted and
/// anything but `y`, `Y` or an empty answer fails.
pub fn acknowledge(
    instructions: &BTreeMap<String, String>,
    key: &str,
    pre_acknowledged: bool,
) -> Result<()> {
    let Some(location) = instructions.get(key) else {
        tracing::debug!(key, "nothing to know");
        return Ok(());
    };
    let action = key.rsplit('.').next().unwrap_or(key);

    if pre_acknowledged {
        println!(
            "This app requires special {action} handling described in {location}. \
             You acknowledged that you are familiar with these instructions."
        );
        return Ok(());
    }

    println!(
        "This app requires special {action} handling described in {location}. \
         Please make sure to familiarize yourself with these instructions before proceeding."
    );
    print!("Ready to proceed (Y/n)? ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    match answer.trim() {
        "" | "y" | "Y" => Ok(()),
        _ => Err(Error::Execution(
            "Please read the instructions before proceeding".to_string(),
        )),
    }
}
