use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::base::{Call, Create, Delete, Read, SeedReadWriteClient, Update};
use crate::config::{ConnectionParams, load_config};
use crate::mapping::{ColumnMapping, read_column_file, read_map_file};
use crate::response::Payload;

const PAGE_SIZE: u64 = 100;

/// Property or tax lot inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InventoryType {
    #[default]
    Property,
    TaxLot,
}

impl InventoryType {
    fn labels_endpoint(self) -> &'static str {
        match self {
            InventoryType::Property => "labels_property",
            InventoryType::TaxLot => "labels_taxlot",
        }
    }

    fn table_name(self) -> &'static str {
        match self {
            InventoryType::Property => "PropertyState",
            InventoryType::TaxLot => "TaxLotState",
        }
    }
}

impl FromStr for InventoryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "property" => Ok(InventoryType::Property),
            "tax_lot" => Ok(InventoryType::TaxLot),
            _ => bail!("inventory_type must be either property or tax_lot"),
        }
    }
}

/// Options for [`SeedClient::upload_and_match_datafile`].
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// SEED source type, e.g. `Assessed Raw` or `Portfolio Raw`.
    pub datafile_type: String,
    /// Also import meter readings when the file has a meters tab.
    pub import_meters_if_exist: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            datafile_type: "Assessed Raw".to_string(),
            import_meters_if_exist: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeedClient {
    client: SeedReadWriteClient,
    cycle_id: Option<u64>,

    poll_interval: Duration,
    retry_max: usize,
    progress: bool,
}

impl SeedClient {
    /// Creates a client for `organization_id` from explicit settings.
    pub fn new(organization_id: u64, params: ConnectionParams) -> Result<Self> {
        let client = params.client_builder(organization_id).read_write()?;
        Ok(Self::from_client(client))
    }

    /// Creates a client from a `seed-config.json` style file.
    pub fn from_config_file(organization_id: u64, path: impl AsRef<Path>) -> Result<Self> {
        Self::new(organization_id, ConnectionParams::from_file(path)?)
    }

    /// Creates a client using environment variables and/or `seed-config.json`.
    pub fn from_env(organization_id: u64) -> Result<Self> {
        Self::new(organization_id, load_config(ConnectionParams::default())?)
    }

    pub fn from_client(client: SeedReadWriteClient) -> Self {
        Self {
            client,
            cycle_id: None,
            poll_interval: Duration::from_secs(2),
            retry_max: 500,
            progress: false,
        }
    }

    pub fn with_cycle_id(mut self, cycle_id: u64) -> Self {
        self.cycle_id = Some(cycle_id);
        self
    }

    /// Time between progress polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Maximum number of progress polls before giving up.
    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max;
        self
    }

    /// Shows a progress bar while waiting on background jobs.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// The underlying CRUD client.
    pub fn client(&self) -> &SeedReadWriteClient {
        &self.client
    }

    pub fn org_id(&self) -> u64 {
        self.client.0.org_id()
    }

    pub fn cycle_id(&self) -> Option<u64> {
        self.cycle_id
    }

    pub fn set_cycle_id(&mut self, cycle_id: Option<u64>) {
        self.cycle_id = cycle_id;
    }

    fn require_cycle(&self) -> Result<u64> {
        self.cycle_id
            .context("cycle_id is not set; use get_or_create_cycle with set_cycle_id")
    }

    fn get_json(&self, pk: Option<u64>, call: Call) -> Result<Value> {
        self.client.get(pk, call)?.into_json()
    }

    fn list_json(&self, call: Call) -> Result<Value> {
        self.client.list(call)?.into_json()
    }

    fn post_json(&self, call: Call) -> Result<Value> {
        self.client.post(call)?.into_json()
    }

    // --- organizations & instance -------------------------------------

    /// Organizations the user belongs to.
    pub fn get_organizations(&self, brief: bool) -> Result<Vec<Value>> {
        let orgs = self.list_json(
            Call::endpoint("organizations")
                .data_name("organizations")
                .query("brief", brief),
        )?;
        into_list(orgs)
    }

    /// SEED version plus the connection this client uses.
    pub fn instance_information(&self) -> Result<Value> {
        let version = self.get_json(
            None,
            Call::endpoint("version").data_name("all").required_pk(false),
        )?;
        Ok(json!({
            "version": version,
            "username": self.client.0.username(),
            "host": self.client.0.base_url(),
            "organization_id": self.org_id(),
        }))
    }

    // --- properties ---------------------------------------------------

    /// Every property in the current cycle, fetched page by page.
    pub fn get_buildings(&self) -> Result<Vec<Value>> {
        let cycle = self.require_cycle()?;
        let pagination = self.list_json(
            Call::endpoint("properties")
                .data_name("pagination")
                .query("per_page", PAGE_SIZE)
                .query("cycle", cycle),
        )?;
        let num_pages = pagination
            .get("num_pages")
            .and_then(Value::as_u64)
            .unwrap_or(1);

        let mut buildings = Vec::new();
        for page in 1..=num_pages {
            let results = self.list_json(
                Call::endpoint("properties")
                    .data_name("results")
                    .query("per_page", PAGE_SIZE)
                    .query("page", page)
                    .query("cycle", cycle),
            )?;
            buildings.extend(into_list(results)?);
        }
        debug!(count = buildings.len(), num_pages, "fetched buildings");
        Ok(buildings)
    }

    /// Searches the current cycle by identifier (partial or exact match).
    pub fn search_buildings(
        &self,
        identifier_filter: Option<&str>,
        identifier_exact: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut call = Call::endpoint("properties_search")
            .required_pk(false)
            .query("cycle", self.require_cycle()?);
        if let Some(filter) = identifier_filter {
            call = call.query("identifier", filter);
        }
        if let Some(exact) = identifier_exact {
            call = call.query("identifier_exact", exact);
        }
        into_list(self.get_json(None, call)?)
    }

    /// Full property view record, including `state`.
    pub fn get_property(&self, property_id: u64) -> Result<Value> {
        self.get_json(
            Some(property_id),
            Call::endpoint("properties").data_name("all"),
        )
    }

    // --- labels -------------------------------------------------------

    /// Labels of the organization, optionally only those named in `filter_by_name`.
    pub fn get_labels(&self, filter_by_name: Option<&[&str]>) -> Result<Vec<Value>> {
        let labels = into_list(self.list_json(Call::endpoint("labels"))?)?;
        Ok(match filter_by_name {
            Some(names) => labels
                .into_iter()
                .filter(|l| {
                    l.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|n| names.contains(&n))
                })
                .collect(),
            None => labels,
        })
    }

    /// Returns the label named `label_name`, creating it when missing.
    pub fn get_or_create_label(
        &self,
        label_name: &str,
        color: &str,
        show_in_list: bool,
    ) -> Result<Value> {
        if let Some(label) = self.get_labels(Some(&[label_name][..]))?.into_iter().next() {
            info!(label = label_name, "label already exists");
            return Ok(label);
        }
        self.post_json(Call::endpoint("labels").json(json!({
            "name": label_name,
            "color": color,
            "show_in_list": show_in_list,
        })))
    }

    /// Renames or recolors an existing label.
    pub fn update_label(
        &self,
        label_name: &str,
        new_label_name: Option<&str>,
        new_color: Option<&str>,
        new_show_in_list: Option<bool>,
    ) -> Result<Value> {
        let label = self
            .get_labels(Some(&[label_name][..]))?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("label '{}' not found", label_name))?;
        let id = id_of(&label, "id")?;

        let mut payload = label;
        if let Some(obj) = payload.as_object_mut() {
            if let Some(name) = new_label_name {
                obj.insert("name".into(), json!(name));
            }
            if let Some(color) = new_color {
                obj.insert("color".into(), json!(color));
            }
            if let Some(show) = new_show_in_list {
                obj.insert("show_in_list".into(), json!(show));
            }
        }
        self.client
            .put(Some(id), Call::endpoint("labels").json(payload))?
            .into_json()
    }

    /// Deletes the label named `label_name`; `None` when SEED answers
    /// without content.
    pub fn delete_label(&self, label_name: &str) -> Result<Option<Value>> {
        let label = self
            .get_labels(Some(&[label_name][..]))?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("label '{}' not found", label_name))?;
        self.client
            .delete(Some(id_of(&label, "id")?), Call::endpoint("labels"))?
            .map(Payload::into_json)
            .transpose()
    }

    /// Labels with the property view ids they are applied to (`is_applied`).
    pub fn get_view_ids_with_label(&self, label_names: &[&str]) -> Result<Vec<Value>> {
        let result = self.post_json(
            Call::endpoint("properties_labels")
                .query("cycle", self.require_cycle()?)
                .json(json!({ "label_names": label_names })),
        )?;
        into_list(result)
    }

    /// Adds and removes labels (by name) on the given inventory ids.
    ///
    /// Names SEED does not know are skipped with a warning.
    pub fn update_labels_of_buildings(
        &self,
        add_label_names: &[&str],
        remove_label_names: &[&str],
        building_ids: &[u64],
        inventory_type: InventoryType,
    ) -> Result<Value> {
        let labels = self.get_labels(None)?;
        let add_label_ids = resolve_label_ids(&labels, add_label_names);
        let remove_label_ids = resolve_label_ids(&labels, remove_label_names);

        let payload = json!({
            "inventory_ids": building_ids,
            "add_label_ids": add_label_ids,
            "remove_label_ids": remove_label_ids,
        });
        self.client
            .put(
                None::<u64>,
                Call::endpoint(inventory_type.labels_endpoint())
                    .required_pk(false)
                    .data_name("all")
                    .json(payload),
            )?
            .into_json()
    }

    // --- cycles -------------------------------------------------------

    pub fn get_cycles(&self) -> Result<Vec<Value>> {
        into_list(self.list_json(Call::endpoint("cycles"))?)
    }

    /// Creates a cycle; SEED allows duplicate names.
    pub fn create_cycle(
        &self,
        cycle_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Value> {
        self.post_json(Call::endpoint("cycles").json(json!({
            "name": cycle_name,
            "start": start_date.format("%Y-%m-%d").to_string(),
            "end": end_date.format("%Y-%m-%d").to_string(),
        })))
    }

    /// Returns the first cycle named `cycle_name`, creating it when missing.
    pub fn get_or_create_cycle(
        &mut self,
        cycle_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        set_cycle_id: bool,
    ) -> Result<Value> {
        let cycles = self.get_cycles()?;

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for name in cycles.iter().filter_map(|c| c.get("name").and_then(Value::as_str)) {
            *counts.entry(name).or_default() += 1;
        }
        for (name, count) in counts.iter().filter(|(_, c)| **c > 1) {
            warn!(
                "More than one cycle named '{}' exists [found {}]. Using the first one.",
                name, count
            );
        }

        let existing = cycles
            .iter()
            .find(|c| c.get("name").and_then(Value::as_str) == Some(cycle_name))
            .cloned();
        let selected = match existing {
            Some(cycle) => {
                info!(cycle = cycle_name, "cycle already exists");
                cycle
            }
            None => self.create_cycle(cycle_name, start_date, end_date)?,
        };

        if set_cycle_id {
            self.cycle_id = Some(id_of(&selected, "id")?);
        }
        Ok(selected)
    }

    pub fn get_cycle_by_name(&mut self, cycle_name: &str, set_cycle_id: bool) -> Result<Value> {
        let cycle = self
            .get_cycles()?
            .into_iter()
            .find(|c| c.get("name").and_then(Value::as_str) == Some(cycle_name))
            .ok_or_else(|| anyhow!("cycle '{}' not found", cycle_name))?;
        if set_cycle_id {
            self.cycle_id = Some(id_of(&cycle, "id")?);
        }
        Ok(cycle)
    }

    /// Deletes an empty cycle and waits for the background removal.
    pub fn delete_cycle(&self, cycle_id: u64) -> Result<Value> {
        let result = match self.client.delete(Some(cycle_id), Call::endpoint("cycles"))? {
            Some(payload) => payload.into_json()?,
            None => return Ok(json!({ "status": "success" })),
        };
        match result.get("progress_key").and_then(Value::as_str) {
            Some(key) => self.track_progress_result(key),
            None => Ok(result),
        }
    }

    // --- datasets & uploads -------------------------------------------

    /// Returns the dataset named `dataset_name`, creating it when missing.
    pub fn get_or_create_dataset(&self, dataset_name: &str) -> Result<Value> {
        let datasets = into_list(
            self.list_json(Call::endpoint("datasets").data_name("datasets"))?,
        )?;
        if let Some(dataset) = datasets
            .into_iter()
            .find(|d| d.get("name").and_then(Value::as_str) == Some(dataset_name))
        {
            info!(dataset = dataset_name, "dataset already created");
            return Ok(dataset);
        }

        // creation only answers with the id
        let created = self.post_json(
            Call::endpoint("datasets").json(json!({ "name": dataset_name })),
        )?;
        let id = id_of(&created, "id")?;
        self.get_json(Some(id), Call::endpoint("datasets").data_name("dataset"))
    }

    /// Uploads a data file into a dataset.
    ///
    /// `upload_datatype` is the SEED source type (`Assessed Raw`,
    /// `Portfolio Raw`, ...). The answer carries `import_file_id`.
    pub fn upload_datafile(
        &self,
        dataset_id: u64,
        data_file: impl AsRef<Path>,
        upload_datatype: &str,
    ) -> Result<Value> {
        let data_file = data_file.as_ref();
        if !data_file.exists() {
            bail!("Data file {} does not exist", data_file.display());
        }
        self.post_json(
            Call::endpoint("upload")
                .query("import_record", dataset_id)
                .query("source_type", upload_datatype)
                .file("file", data_file),
        )
    }

    /// Polls a background job until it reports `progress == 100`.
    ///
    /// Failed polls are logged and retried; gives up after `retry_max` polls.
    pub fn track_progress_result(&self, progress_key: &str) -> Result<Value> {
        if progress_key.is_empty() {
            bail!("No progress key provided");
        }

        let pb = if self.progress {
            let pb = ProgressBar::new(100);
            if let Ok(style) =
                ProgressStyle::with_template("{spinner:.green} {msg} {wide_bar} {pos}%")
            {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb.set_message(progress_key.to_string());
            Some(pb)
        } else {
            None
        };

        for attempt in 1..=self.retry_max {
            let polled = self
                .client
                .get(
                    None::<u64>,
                    Call::endpoint("progress")
                        .required_pk(false)
                        .url_arg("PROGRESS_KEY", progress_key),
                )
                .and_then(Payload::into_json);

            match polled {
                Ok(result) => {
                    let progress = result.get("progress").and_then(Value::as_f64).unwrap_or(0.0);
                    if let Some(pb) = &pb {
                        pb.set_position(progress.clamp(0.0, 100.0) as u64);
                    }
                    if progress >= 100.0 {
                        if let Some(pb) = &pb {
                            pb.finish_and_clear();
                        }
                        return Ok(result);
                    }
                    debug!(progress_key, progress, "waiting on background job");
                }
                Err(e) => {
                    warn!(progress_key, attempt, error = %e, "failed to poll progress");
                }
            }
            thread::sleep(self.poll_interval);
        }

        if let Some(pb) = &pb {
            pb.abandon();
        }
        bail!(
            "progress {} did not complete after {} poll(s)",
            progress_key,
            self.retry_max
        )
    }

    // --- columns ------------------------------------------------------

    /// All columns of the organization, as `{"status", "columns"}`.
    pub fn get_columns(&self) -> Result<Value> {
        self.list_json(Call::endpoint("columns").data_name("all"))
    }

    /// Creates an extra data column unless one with the same name already
    /// exists on that inventory's table.
    pub fn create_extra_data_column(
        &self,
        column_name: &str,
        display_name: &str,
        inventory_type: InventoryType,
        column_description: &str,
        data_type: &str,
    ) -> Result<Value> {
        let table_name = inventory_type.table_name();
        let columns = self.get_columns()?;
        let existing = columns
            .get("columns")
            .and_then(Value::as_array)
            .and_then(|cols| {
                cols.iter().find(|c| {
                    c.get("column_name").and_then(Value::as_str) == Some(column_name)
                        && c.get("table_name").and_then(Value::as_str) == Some(table_name)
                })
            });
        if let Some(column) = existing {
            info!(column = column_name, table = table_name, "column already exists");
            return Ok(json!({
                "status": "noop",
                "message": format!("column {} already exists", column_name),
                "column": column,
            }));
        }

        self.post_json(
            Call::endpoint("columns").data_name("all").json(json!({
                "column_name": column_name,
                "display_name": display_name,
                "table_name": table_name,
                "column_description": column_description,
                "data_type": data_type,
                "organization_id": self.org_id(),
                "is_extra_data": true,
            })),
        )
    }

    /// Creates every extra data column listed in a columns CSV file.
    pub fn create_extra_data_columns_from_file(
        &self,
        columns_file: impl AsRef<Path>,
    ) -> Result<Vec<Value>> {
        read_column_file(columns_file)?
            .iter()
            .map(|col| {
                let inventory_type = col.inventory_type.to_ascii_lowercase().parse()?;
                self.create_extra_data_column(
                    &col.column_name,
                    &col.display_name,
                    inventory_type,
                    &col.column_description,
                    &col.data_type,
                )
            })
            .collect()
    }

    // --- column mappings ----------------------------------------------

    /// Column mapping profiles, filtered by `profile_type` unless it is `All`.
    pub fn get_column_mapping_profiles(&self, profile_type: &str) -> Result<Vec<Value>> {
        let profiles = into_list(
            self.post_json(Call::endpoint("column_mapping_profiles_filter"))?,
        )?;
        if profile_type == "All" {
            return Ok(profiles);
        }
        Ok(profiles
            .into_iter()
            .filter(|p| p.get("profile_type").and_then(Value::as_str) == Some(profile_type))
            .collect())
    }

    pub fn get_column_mapping_profile(&self, name: &str) -> Result<Option<Value>> {
        Ok(self
            .get_column_mapping_profiles("All")?
            .into_iter()
            .find(|p| p.get("name").and_then(Value::as_str) == Some(name)))
    }

    /// Creates a `Normal` profile, or replaces the mappings of an existing
    /// one with the same name.
    pub fn create_or_update_column_mapping_profile(
        &self,
        mapping_profile_name: &str,
        mappings: &[ColumnMapping],
    ) -> Result<Value> {
        match self.get_column_mapping_profile(mapping_profile_name)? {
            None => self.post_json(Call::endpoint("column_mapping_profiles").json(json!({
                "name": mapping_profile_name,
                "mappings": mappings,
                "profile_type": "Normal",
            }))),
            Some(profile) => {
                let id = id_of(&profile, "id")?;
                self.client
                    .put(
                        Some(id),
                        Call::endpoint("column_mapping_profiles")
                            .json(json!({ "mappings": mappings })),
                    )?
                    .into_json()
            }
        }
    }

    /// Same as [`SeedClient::create_or_update_column_mapping_profile`] with
    /// the mappings read from a CSV mapping file.
    pub fn create_or_update_column_mapping_profile_from_file(
        &self,
        mapping_profile_name: &str,
        mapping_file: impl AsRef<Path>,
    ) -> Result<Value> {
        let mappings = read_map_file(mapping_file)?;
        self.create_or_update_column_mapping_profile(mapping_profile_name, &mappings)
    }

    /// Applies column mappings (as returned in a profile) to an import file.
    pub fn set_import_file_column_mappings(
        &self,
        import_file_id: u64,
        mappings: &Value,
    ) -> Result<Value> {
        self.post_json(
            Call::endpoint("org_column_mapping_import_file")
                .url_arg("ORG_ID", self.org_id())
                .query("import_file_id", import_file_id)
                .json(json!({ "mappings": mappings })),
        )
    }

    // --- import pipeline ----------------------------------------------

    /// Starts saving the raw file into the current cycle; returns the progress key.
    pub fn start_save_data(&self, import_file_id: u64) -> Result<Value> {
        self.post_json(
            Call::endpoint("import_files_start_save_data_pk")
                .url_arg("PK", import_file_id)
                .json(json!({ "cycle_id": self.require_cycle()? })),
        )
    }

    pub fn start_map_data(&self, import_file_id: u64) -> Result<Value> {
        self.post_json(
            Call::endpoint("import_files_start_map_data_pk")
                .url_arg("PK", import_file_id)
                .json(json!({ "remap": true })),
        )
    }

    /// Saves the mappings and starts matching and geocoding.
    ///
    /// The progress key is under `progress_data`.
    pub fn start_system_matching_and_geocoding(&self, import_file_id: u64) -> Result<Value> {
        self.post_json(
            Call::endpoint("import_files_start_matching_pk")
                .url_arg("PK", import_file_id)
                .data_name("all"),
        )
    }

    pub fn get_matching_results(&self, import_file_id: u64) -> Result<Value> {
        self.get_json(
            None,
            Call::endpoint("import_files_matching_results")
                .required_pk(false)
                .url_arg("PK", import_file_id),
        )
    }

    /// Whether the uploaded workbook has a meter readings tab.
    pub fn check_meters_tab_exist(&self, import_file_id: u64) -> Result<bool> {
        let result = self.get_json(
            None,
            Call::endpoint("import_files_check_meters_tab_exists_pk")
                .required_pk(false)
                .url_arg("PK", import_file_id),
        )?;
        Ok(result.as_bool().unwrap_or(false))
    }

    /// Imports the meters tab of an already imported file and waits for it.
    pub fn import_meters(&self, import_file_id: u64) -> Result<Value> {
        let result = self.post_json(
            Call::endpoint("import_files_reuse_inventory_file_for_meters")
                .json(json!({ "import_file_id": import_file_id })),
        )?;
        let meter_import_file_id = id_of(&result, "import_file_id")?;
        let saved = self.start_save_data(meter_import_file_id)?;
        self.track_progress_result(progress_key(&saved)?)
    }

    /// Uploads a file into the current cycle and carries it through save,
    /// mapping, matching and geocoding. Returns the matching summary.
    pub fn upload_and_match_datafile(
        &self,
        dataset_name: &str,
        datafile: impl AsRef<Path>,
        column_mapping_profile_name: &str,
        column_mappings_file: impl AsRef<Path>,
        options: &UploadOptions,
    ) -> Result<Value> {
        let dataset = self.get_or_create_dataset(dataset_name)?;
        let uploaded =
            self.upload_datafile(id_of(&dataset, "id")?, datafile, &options.datafile_type)?;
        let import_file_id = id_of(&uploaded, "import_file_id")?;
        info!(import_file_id, "uploaded data file");

        let saved = self.start_save_data(import_file_id)?;
        self.track_progress_result(progress_key(&saved)?)?;

        let profile = self.create_or_update_column_mapping_profile_from_file(
            column_mapping_profile_name,
            column_mappings_file,
        )?;
        let mappings = profile
            .get("mappings")
            .context("column mapping profile has no mappings")?;
        self.set_import_file_column_mappings(import_file_id, mappings)?;

        let mapped = self.start_map_data(import_file_id)?;
        self.track_progress_result(progress_key(&mapped)?)?;

        let matching = self.start_system_matching_and_geocoding(import_file_id)?;
        let progress_data = matching
            .get("progress_data")
            .context("matching response has no progress_data")?;
        self.track_progress_result(progress_key(progress_data)?)?;

        if options.import_meters_if_exist && self.check_meters_tab_exist(import_file_id)? {
            info!(import_file_id, "importing meters");
            self.import_meters(import_file_id)?;
        }

        self.get_matching_results(import_file_id)
    }

    // --- meters -------------------------------------------------------

    pub fn get_meters(&self, property_id: u64) -> Result<Vec<Value>> {
        into_list(self.get_json(
            None,
            Call::endpoint("properties_meters")
                .required_pk(false)
                .url_arg("PK", property_id),
        )?)
    }

    /// The meter of a property matching type, source and source id.
    pub fn get_meter(
        &self,
        property_id: u64,
        meter_type: &str,
        source: &str,
        source_id: &str,
    ) -> Result<Option<Value>> {
        Ok(self.get_meters(property_id)?.into_iter().find(|m| {
            m.get("type").and_then(Value::as_str) == Some(meter_type)
                && m.get("source").and_then(Value::as_str) == Some(source)
                && m.get("source_id").and_then(Value::as_str) == Some(source_id)
        }))
    }

    pub fn get_or_create_meter(
        &self,
        property_id: u64,
        meter_type: &str,
        source: &str,
        source_id: &str,
    ) -> Result<Value> {
        if let Some(meter) = self.get_meter(property_id, meter_type, source, source_id)? {
            info!(property_id, source_id, "meter already exists");
            return Ok(meter);
        }
        self.post_json(
            Call::endpoint("properties_meters")
                .url_arg("PK", property_id)
                .json(json!({
                    "type": meter_type,
                    "source": source,
                    "source_id": source_id,
                })),
        )
    }

    pub fn delete_meter(&self, property_id: u64, meter_id: u64) -> Result<Option<Value>> {
        self.client
            .delete(
                Some(meter_id),
                Call::endpoint("properties_meters").url_arg("PK", property_id),
            )?
            .map(Payload::into_json)
            .transpose()
    }

    /// Meter usage of a property aggregated by `interval`
    /// (`Exact`, `Month` or `Year`).
    pub fn get_meter_data(
        &self,
        property_id: u64,
        interval: &str,
        excluded_meter_ids: &[u64],
    ) -> Result<Value> {
        self.post_json(
            Call::endpoint("properties_meter_usage")
                .url_arg("PK", property_id)
                .json(json!({
                    "interval": interval,
                    "excluded_meter_ids": excluded_meter_ids,
                })),
        )
    }

    /// Adds readings to a meter.
    ///
    /// Each reading is `{"start_time", "end_time", "reading", "source_unit",
    /// "conversion_factor"}`.
    pub fn add_meter_readings(
        &self,
        property_id: u64,
        meter_id: u64,
        readings: &Value,
    ) -> Result<Value> {
        self.post_json(
            Call::endpoint("properties_meters_reading")
                .url_arg("PK", property_id)
                .url_arg("METER_PK", meter_id)
                .json(readings.clone()),
        )
    }

    pub fn get_meter_readings(&self, property_id: u64, meter_id: u64) -> Result<Vec<Value>> {
        into_list(self.get_json(
            None,
            Call::endpoint("properties_meters_reading")
                .required_pk(false)
                .url_arg("PK", property_id)
                .url_arg("METER_PK", meter_id),
        )?)
    }

    // --- portfolio manager --------------------------------------------

    /// Names of the report templates of a Portfolio Manager account.
    pub fn get_pm_report_template_names(
        &self,
        pm_username: &str,
        pm_password: &str,
    ) -> Result<Vec<String>> {
        let result = self.post_json(
            Call::endpoint("portfolio_manager_report_templates")
                .data_name("all")
                .json(json!({ "username": pm_username, "password": pm_password })),
        )?;
        let templates = result
            .get("templates")
            .and_then(Value::as_array)
            .context("response has no templates")?;
        Ok(templates
            .iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// Downloads a Portfolio Manager property export and writes it to `save_path`.
    pub fn download_pm_property(
        &self,
        save_path: impl AsRef<Path>,
        pm_property_id: u64,
        pm_username: &str,
        pm_password: &str,
    ) -> Result<PathBuf> {
        let payload = self.client.post(
            Call::endpoint("portfolio_manager_property_download")
                .url_arg("PK", pm_property_id)
                .json(json!({ "username": pm_username, "password": pm_password })),
        )?;
        let bytes = match payload {
            Payload::Spreadsheet(bytes) => bytes,
            other => bail!(
                "expected a spreadsheet for PM property {}, got {:?}",
                pm_property_id,
                other.into_json().ok()
            ),
        };

        let save_path = save_path.as_ref();
        if let Some(parent) = save_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
        }
        std::fs::write(save_path, &bytes)
            .with_context(|| format!("failed to write {}", save_path.display()))?;
        info!(path = %save_path.display(), bytes = bytes.len(), "saved PM property");
        Ok(save_path.to_path_buf())
    }
}

/// Maps label names to ids, warning about names `labels` does not contain.
pub fn resolve_label_ids(labels: &[Value], names: &[&str]) -> Vec<u64> {
    let lookup: BTreeMap<&str, u64> = labels
        .iter()
        .filter_map(|l| {
            let name = l.get("name")?.as_str()?;
            let id = l.get("id")?.as_u64()?;
            Some((name, id))
        })
        .collect();

    names
        .iter()
        .filter_map(|name| {
            let id = lookup.get(name).copied();
            if id.is_none() {
                warn!("label name {} not found in SEED, skipping", name);
            }
            id
        })
        .collect()
}

fn into_list(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => bail!("expected a list from SEED, got {}", other),
    }
}

/// Reads an id that SEED may send as a number or a numeric string.
fn id_of(value: &Value, key: &str) -> Result<u64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| anyhow!("response has no valid `{}`: {}", key, value))
}

fn progress_key(value: &Value) -> Result<&str> {
    value
        .get("progress_key")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("response has no progress_key: {}", value))
}
