use anyhow::{Result, bail};
use std::collections::BTreeMap;

use crate::util::join_url;

/// Default API version.
pub const DEFAULT_VERSION: &str = "v3";

/// Endpoint names and paths for the v3 API.
///
/// Upper-case path segments (`PK`, `ORG_ID`, `METER_PK`, ...) are
/// placeholders filled in per call with `url_args`.
pub const V3_ENDPOINTS: &[(&str, &str)] = &[
    ("column_mapping_profiles", "/api/v3/column_mapping_profiles/"),
    ("column_mapping_profiles_filter", "/api/v3/column_mapping_profiles/filter/"),
    ("columns", "/api/v3/columns/"),
    ("cycles", "/api/v3/cycles/"),
    ("datasets", "/api/v3/datasets/"),
    ("gbr_properties", "/api/v3/gbr_properties/"),
    ("green_assessment", "/api/v3/green_assessments/"),
    ("green_assessment_property", "/api/v3/green_assessment_properties/"),
    ("green_assessment_url", "/api/v3/green_assessment_urls/"),
    ("import_files", "/api/v3/import_files/"),
    (
        "import_files_reuse_inventory_file_for_meters",
        "/api/v3/import_files/reuse_inventory_file_for_meters/",
    ),
    ("labels", "/api/v3/labels/"),
    ("labels_property", "/api/v3/labels_property/"),
    ("labels_taxlot", "/api/v3/labels_taxlot/"),
    ("organizations", "/api/v3/organizations/"),
    ("portfolio_manager_report", "/api/v3/portfolio_manager/report/"),
    ("portfolio_manager_report_templates", "/api/v3/portfolio_manager/template_list/"),
    ("properties", "/api/v3/properties/"),
    ("properties_labels", "/api/v3/properties/labels/"),
    ("properties_search", "/api/v3/properties/search/"),
    ("property_views", "/api/v3/property_views/"),
    ("taxlots", "/api/v3/taxlots/"),
    ("upload", "/api/v3/upload/"),
    ("users", "/api/v3/users/"),
    // unversioned
    ("version", "/api/version/"),
    // POST templates
    (
        "import_files_check_meters_tab_exists_pk",
        "/api/v3/import_files/PK/check_meters_tab_exists/",
    ),
    ("import_files_start_map_data_pk", "/api/v3/import_files/PK/map/"),
    (
        "import_files_start_matching_pk",
        "/api/v3/import_files/PK/start_system_matching_and_geocoding/",
    ),
    ("import_files_start_save_data_pk", "/api/v3/import_files/PK/start_save_data/"),
    ("org_column_mapping_import_file", "/api/v3/organizations/ORG_ID/column_mappings/"),
    ("portfolio_manager_property_download", "/api/v3/portfolio_manager/PK/download/"),
    // PUT templates
    (
        "properties_update_with_buildingsync",
        "/api/v3/properties/PK/update_with_building_sync/",
    ),
    ("property_update_with_espm", "/api/v3/properties/PK/update_with_espm/"),
    // GET templates
    ("analyses_views", "/api/v3/analyses/PK/views/ANALYSIS_VIEW_PK/"),
    (
        "import_files_matching_results",
        "/api/v3/import_files/PK/matching_and_geocoding_results/",
    ),
    ("properties_cross_cycle_data", "/api/v3/properties/PK/links/"),
    ("progress", "/api/v3/progress/PROGRESS_KEY/"),
    ("properties_analyses", "/api/v3/properties/PK/analyses/"),
    ("properties_meter_usage", "/api/v3/properties/PK/meter_usage/"),
    ("properties_meters", "/api/v3/properties/PK/meters/"),
    ("properties_meters_reading", "/api/v3/properties/PK/meters/METER_PK/readings/"),
];

/// Returns the endpoint table for an API version.
pub fn endpoint_map(version: &str) -> Result<BTreeMap<String, String>> {
    match version {
        "v3" => Ok(V3_ENDPOINTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()),
        other => bail!("unsupported SEED API version [{}]", other),
    }
}

/// Qualifies every endpoint path with `base_url`.
///
/// `url_map` replaces the built-in table for `version` when given.
pub fn get_urls(
    base_url: &str,
    url_map: Option<&BTreeMap<String, String>>,
    version: Option<&str>,
) -> Result<BTreeMap<String, String>> {
    let owned;
    let map = match url_map {
        Some(m) => m,
        None => {
            owned = endpoint_map(version.unwrap_or(DEFAULT_VERSION))?;
            &owned
        }
    };
    Ok(map
        .iter()
        .map(|(k, v)| (k.clone(), join_url(base_url, v)))
        .collect())
}
