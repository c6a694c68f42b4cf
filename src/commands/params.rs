//! Params command: the search space at a glance

use anyhow::Result;
use signal_tuner::params::ParameterSpace;

pub fn run(resolved: bool) -> Result<()> {
    let space = ParameterSpace::new();

    println!("\n{}", "=".repeat(80));
    println!("PARAMETER SPACE ({} dimensions)", space.len());
    println!("{}", "=".repeat(80));
    println!(
        "{:>3} {:<36} {:>10} {:>10} {:>10} {:>4}",
        "#", "Name", "Lower", "Upper", "Baseline", "Int"
    );
    println!("{}", "-".repeat(80));
    for (i, dim) in space.dimensions().iter().enumerate() {
        println!(
            "{:>3} {:<36} {:>10.4} {:>10.4} {:>10.4} {:>4}",
            i,
            dim.name,
            dim.lower,
            dim.upper,
            dim.baseline,
            if dim.integer { "yes" } else { "" }
        );
    }

    if resolved {
        println!("\nDecoded baseline:");
        for (name, value) in space.baseline().named_values() {
            println!("  {:<36} {:>10.4}", name, value);
        }
    }

    Ok(())
}
