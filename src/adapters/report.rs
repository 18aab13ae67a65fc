use crate::domain::disturbance::DisturbanceElement;
use crate::domain::map_id::map_file_name;
use crate::domain::ports::Storage;
use crate::utils::error::{IngestError, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    situation_reference: &'a str,
    disturbance_id: u32,
    map_id: String,
    route_index: u32,
    node_id: u32,
    lat: i32,
    lon: i32,
    angle: u32,
    severity: String,
    cost_factor: u32,
}

/// 每個路線點一列
pub fn disturbances_to_csv(elements: &[DisturbanceElement]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for element in elements {
        let map_id = map_file_name(element.map_id)
            .trim_end_matches(".mcm")
            .to_string();
        for point in element.coordinates() {
            writer.serialize(ExportRow {
                situation_reference: &element.situation_reference,
                disturbance_id: element.disturbance_id,
                map_id: map_id.clone(),
                route_index: point.route_index,
                node_id: point.node_id,
                lat: point.coord.lat,
                lon: point.coord.lon,
                angle: point.angle,
                severity: format!("{:?}", element.severity),
                cost_factor: element.cost_factor,
            })?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| IngestError::processing(format!("CSV flush failed: {}", e)))
}

pub async fn export_disturbances<S: Storage>(
    storage: &S,
    path: &str,
    elements: &[DisturbanceElement],
) -> Result<usize> {
    let data = disturbances_to_csv(elements)?;
    let rows = elements.iter().map(|e| e.nbr_coordinates()).sum();
    tracing::debug!("Writing {} CSV rows ({} bytes) to {}", rows, data.len(), path);
    storage.write_file(path, &data).await?;
    Ok(rows)
}
