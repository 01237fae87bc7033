use anyhow::Result;
use chrono::NaiveDate;
use seedapi::{SeedClient, UploadOptions};

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure the connection via SEED_* env vars or a `seed-config.json` file.
    let organization_id = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    let mut client = SeedClient::from_env(organization_id)?.with_progress(true);

    let start = NaiveDate::from_ymd_opt(2021, 6, 1).expect("valid date");
    let end = NaiveDate::from_ymd_opt(2022, 6, 1).expect("valid date");
    client.get_or_create_cycle("pyseed-api-test", start, end, true)?;

    let summary = client.upload_and_match_datafile(
        "pyseed-properties-test",
        "data/test-seed-data.xlsx",
        "Single Step Column Mappings",
        "data/test-seed-data-mappings.csv",
        &UploadOptions::default(),
    )?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    for building in client.search_buildings(None, Some("B-1"))? {
        println!("{}", building["id"]);
    }
    Ok(())
}
