use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::f64::consts::PI;

pub const WGS84_RADIUS: f64 = 6_378_137.0;

fn rad(value: f64) -> f64 {
    value * PI / 180.0
}

fn as_array<'a>(value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .context("coordinates must be a list or tuple")
}

fn point(value: &Value) -> Result<(f64, f64)> {
    let p = as_array(value)?;
    let lon = p.first().and_then(Value::as_f64);
    let lat = p.get(1).and_then(Value::as_f64);
    match (lon, lat) {
        (Some(lon), Some(lat)) => Ok((lon, lat)),
        _ => bail!("coordinate must be a [longitude, latitude] pair"),
    }
}

/// Signed area of a ring in square meters; positive when clockwise.
///
/// Chamberlain & Duquette, "Some Algorithms for Polygons on a Sphere"
/// (JPL Publication 07-03, 2007).
pub fn ring_area(coordinates: &Value) -> Result<f64> {
    let coords = as_array(coordinates)?
        .iter()
        .map(point)
        .collect::<Result<Vec<_>>>()?;
    let n = coords.len();
    if n <= 2 {
        return Ok(0.0);
    }

    let mut total = 0.0;
    for i in 0..n {
        let (lower, middle, upper) = if i == n - 2 {
            (n - 2, n - 1, 0)
        } else if i == n - 1 {
            (n - 1, 0, 1)
        } else {
            (i, i + 1, i + 2)
        };
        let p1 = coords[lower];
        let p2 = coords[middle];
        let p3 = coords[upper];
        total += (rad(p3.0) - rad(p1.0)) * rad(p2.1).sin();
    }
    Ok(total * WGS84_RADIUS * WGS84_RADIUS / 2.0)
}

/// Area of the outer ring minus the area of every hole.
pub fn polygon_area(coordinates: &Value) -> Result<f64> {
    let rings = as_array(coordinates)?;
    let mut total = 0.0;
    if let Some((outer, holes)) = rings.split_first() {
        total += ring_area(outer)?.abs();
        for hole in holes {
            total -= ring_area(hole)?.abs();
        }
    }
    Ok(total)
}

/// Area of a GeoJSON geometry in square meters.
///
/// `geometry` may also be a JSON string holding the geometry. Polygons,
/// multi-polygons and geometry collections are measured; any other type has
/// no area.
pub fn geojson_area(geometry: &Value) -> Result<f64> {
    if let Value::String(s) = geometry {
        let parsed: Value = serde_json::from_str(s).context("geometry is not valid JSON")?;
        return geojson_area(&parsed);
    }
    let Some(obj) = geometry.as_object() else {
        bail!("geometry must be a GeoJSON dict");
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("Polygon") => polygon_area(obj.get("coordinates").unwrap_or(&Value::Null)),
        Some("MultiPolygon") => {
            let mut total = 0.0;
            for polygon in as_array(obj.get("coordinates").unwrap_or(&Value::Null))? {
                total += polygon_area(polygon)?;
            }
            Ok(total)
        }
        Some("GeometryCollection") => {
            let geometries = obj
                .get("geometries")
                .and_then(Value::as_array)
                .context("geometries must be a list")?;
            let mut total = 0.0;
            for g in geometries {
                total += geojson_area(g)?;
            }
            Ok(total)
        }
        _ => Ok(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(lon: f64, lat: f64, size: f64) -> Value {
        json!([
            [lon, lat],
            [lon, lat + size],
            [lon + size, lat + size],
            [lon + size, lat],
            [lon, lat]
        ])
    }

    fn close(a: f64, b: f64, rel: f64) -> bool {
        ((a - b) / b).abs() < rel
    }

    #[test]
    fn one_degree_at_equator() {
        // 1 x 1 degree cell at the equator is about 12,391 km^2
        let area = geojson_area(&json!({"type": "Polygon", "coordinates": [square(0.0, 0.0, 1.0)]}))
            .unwrap();
        assert!(close(area, 12_391_399_902.071, 1e-9), "area was {}", area);
    }

    #[test]
    fn orientation_sign() {
        let clockwise = ring_area(&square(0.0, 0.0, 1.0)).unwrap();
        let reversed: Vec<Value> = square(0.0, 0.0, 1.0)
            .as_array()
            .unwrap()
            .iter()
            .rev()
            .cloned()
            .collect();
        let counter = ring_area(&Value::Array(reversed)).unwrap();
        assert!(clockwise > 0.0);
        assert!(close(-counter, clockwise, 1e-9));
    }

    #[test]
    fn holes_are_subtracted() {
        let outer = square(0.0, 0.0, 1.0);
        let hole = square(0.25, 0.25, 0.5);
        let full = polygon_area(&json!([outer.clone()])).unwrap();
        let with_hole = polygon_area(&json!([outer, hole.clone()])).unwrap();
        let hole_area = ring_area(&hole).unwrap().abs();
        assert!(close(with_hole, full - hole_area, 1e-9));
    }

    #[test]
    fn multi_and_collections() {
        let poly = json!({"type": "Polygon", "coordinates": [square(10.0, 45.0, 0.01)]});
        let single = geojson_area(&poly).unwrap();
        let multi = json!({
            "type": "MultiPolygon",
            "coordinates": [[square(10.0, 45.0, 0.01)], [square(10.0, 45.0, 0.01)]]
        });
        assert!(close(geojson_area(&multi).unwrap(), 2.0 * single, 1e-9));

        let collection = json!({"type": "GeometryCollection", "geometries": [poly, {"type": "Point", "coordinates": [1, 2]}]});
        assert!(close(geojson_area(&collection).unwrap(), single, 1e-9));
    }

    #[test]
    fn string_input_and_errors() {
        let s = json!({"type": "Polygon", "coordinates": [square(0.0, 0.0, 1.0)]}).to_string();
        assert!(geojson_area(&Value::String(s)).unwrap() > 0.0);
        assert!(geojson_area(&json!([1, 2])).is_err());
        assert!(polygon_area(&json!("nope")).is_err());
        assert_eq!(ring_area(&json!([[0, 0], [1, 1]])).unwrap(), 0.0);
    }
}
