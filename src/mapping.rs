use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One raw-column to SEED-field mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub from_field: String,
    pub from_units: String,
    pub to_table_name: String,
    pub to_field: String,
    #[serde(default)]
    pub is_omitted: bool,
}

/// Reads the mappings from a CSV mapping file.
///
/// The file has a header row and the columns
/// `Raw Columns, units, SEED Table, SEED Columns[, Omit]`:
///
/// ```text
/// Raw Columns,units,SEED Table,SEED Columns,Omit
/// PM Property ID,,PropertyState,pm_property_id,
/// Sq. Ft,ft**2,PropertyState,gross_floor_area,
/// Notes,,PropertyState,notes,true
/// ```
pub fn read_map_file(path: impl AsRef<Path>) -> Result<Vec<ColumnMapping>> {
    let path = path.as_ref();
    if !path.exists() {
        bail!("Mapping file {} does not exist", path.display());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open mapping file {}", path.display()))?;
    parse_mappings(file).with_context(|| format!("failed to parse mapping file {}", path.display()))
}

/// Parses mapping rows from any CSV reader; the first row is a header.
pub fn parse_mappings<R: std::io::Read>(reader: R) -> Result<Vec<ColumnMapping>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut mappings = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        if record.len() < 4 {
            bail!("row {} has {} column(s), expected at least 4", i + 2, record.len());
        }
        mappings.push(ColumnMapping {
            from_field: record[0].to_string(),
            from_units: record[1].to_string(),
            to_table_name: record[2].to_string(),
            to_field: record[3].to_string(),
            is_omitted: record
                .get(4)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        });
    }
    Ok(mappings)
}

/// An extra data column to create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnDefinition {
    pub column_name: String,
    pub display_name: String,
    #[serde(default)]
    pub column_description: String,
    /// `property` or `tax_lot`.
    pub inventory_type: String,
    pub data_type: String,
}

/// Reads column definitions from a CSV file with the header
/// `column_name,display_name,column_description,inventory_type,data_type`.
pub fn read_column_file(path: impl AsRef<Path>) -> Result<Vec<ColumnDefinition>> {
    let path = path.as_ref();
    if !path.exists() {
        bail!("Columns file {} does not exist", path.display());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open columns file {}", path.display()))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<ColumnDefinition>, _>>()
        .with_context(|| format!("failed to parse columns file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "Raw Columns,units,SEED Table,SEED Columns,Omit
Property Id,,PropertyState,custom_id_1,
Sq. Ft,ft**2,PropertyState,gross_floor_area
Notes,,PropertyState,notes, TRUE
";

    #[test]
    fn parses_rows() {
        let mappings = parse_mappings(SAMPLE.as_bytes()).unwrap();
        assert_eq!(mappings.len(), 3);
        assert_eq!(
            mappings[1],
            ColumnMapping {
                from_field: "Sq. Ft".into(),
                from_units: "ft**2".into(),
                to_table_name: "PropertyState".into(),
                to_field: "gross_floor_area".into(),
                is_omitted: false,
            }
        );
        assert!(!mappings[0].is_omitted);
        assert!(mappings[2].is_omitted);
    }

    #[test]
    fn short_rows_are_rejected() {
        let err = parse_mappings("a,b,c,d\nx,y\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("expected at least 4"));
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let mappings = read_map_file(file.path()).unwrap();
        assert_eq!(mappings.len(), 3);
    }

    #[test]
    fn missing_file() {
        let err = read_map_file("/nonexistent/mappings.csv").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Mapping file /nonexistent/mappings.csv does not exist"
        );
    }

    #[test]
    fn reads_column_definitions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"column_name,display_name,column_description,inventory_type,data_type
EUI Target, EUI Target,Target site EUI,property,number
Parcel Notes,Parcel Notes,,tax_lot,string
",
        )
        .unwrap();
        let cols = read_column_file(file.path()).unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].display_name, "EUI Target");
        assert_eq!(cols[0].data_type, "number");
        assert_eq!(cols[1].column_description, "");
        assert_eq!(cols[1].inventory_type, "tax_lot");

        let err = read_column_file("/nonexistent/columns.csv").unwrap_err();
        assert_eq!(err.to_string(), "Columns file /nonexistent/columns.csv does not exist");
    }

    #[test]
    fn serializes_for_the_api() {
        let m = parse_mappings(SAMPLE.as_bytes()).unwrap();
        let v = serde_json::to_value(&m[0]).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "from_field": "Property Id",
                "from_units": "",
                "to_table_name": "PropertyState",
                "to_field": "custom_id_1",
                "is_omitted": false
            })
        );
    }
}
