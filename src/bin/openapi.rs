//! Print the OpenAPI document as JSON, for docs pipelines and client
//! generation.

use anyhow::Result;

fn main() -> Result<()> {
    let spec = tessera::api::openapi();
    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(())
}
