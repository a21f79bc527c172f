//! Address repository backed by the national address base (BAN) department
//! extracts: `adresses-<dep>.csv.gz`, `;`-separated.

use crate::adapters::single_flight::SingleFlight;
use crate::domain::model::AddressRecord;
use crate::domain::ports::{AddressRepository, Storage};
use crate::utils::error::{Result, TractError};
use crate::utils::validation::{normalize_postal_code, validate_department};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::Client;
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BAN_BASE_URL: &str = "https://adresse.data.gouv.fr/data/ban/adresses/latest/csv";

#[derive(Debug, Deserialize)]
struct BanRow {
    numero: Option<String>,
    rep: Option<String>,
    nom_voie: Option<String>,
    code_postal: Option<String>,
    nom_commune: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// "12 bis, Rue de la République, 69002 Lyon", skipping missing parts.
fn build_label(row: &BanRow) -> String {
    // "012" -> "12"，非數字的門牌照原樣保留
    let numero = non_empty(&row.numero).map(|n| {
        n.parse::<u32>()
            .map(|v| v.to_string())
            .unwrap_or_else(|_| n.to_string())
    });
    let mut parts = Vec::new();
    if let Some(numero) = numero {
        match non_empty(&row.rep) {
            Some(rep) => parts.push(format!("{} {}", numero, rep)),
            None => parts.push(numero),
        }
    }
    if let Some(voie) = non_empty(&row.nom_voie) {
        parts.push(voie.to_string());
    }

    let postal = non_empty(&row.code_postal)
        .and_then(normalize_postal_code)
        .unwrap_or_default();
    let commune = non_empty(&row.nom_commune).unwrap_or_default();
    let locality = format!("{} {}", postal, commune).trim().to_string();

    if !locality.is_empty() {
        parts.push(locality);
    }
    parts.join(", ")
}

/// 解壓（若為 gzip）並解析 BAN CSV，缺座標的列略過
pub fn parse_ban_csv(bytes: &[u8]) -> Result<Vec<AddressRecord>> {
    let mut raw = Vec::new();
    if bytes.starts_with(&[0x1f, 0x8b]) {
        GzDecoder::new(bytes).read_to_end(&mut raw)?;
    } else {
        raw.extend_from_slice(bytes);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(raw.as_slice());

    let headers = reader.headers()?.clone();
    for required in ["nom_voie", "nom_commune", "lat", "lon"] {
        if !headers.iter().any(|h| h == required) {
            return Err(TractError::DataFormat {
                message: format!("address file is missing column '{}'", required),
            });
        }
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<BanRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::debug!("Skipping unreadable address row: {}", e);
                skipped += 1;
                continue;
            }
        };
        let (Some(lat), Some(lon)) = (row.lat, row.lon) else {
            skipped += 1;
            continue;
        };

        records.push(AddressRecord {
            street_label: build_label(&row),
            street_name: non_empty(&row.nom_voie).unwrap_or_default().to_string(),
            house_number: non_empty(&row.numero).and_then(|n| n.parse().ok()),
            latitude: lat,
            longitude: lon,
            municipality_name: non_empty(&row.nom_commune).unwrap_or_default().to_string(),
        });
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} address rows without usable coordinates", skipped);
    }
    Ok(records)
}

/// 解壓與解析屬於 CPU 工作，交給 blocking 執行緒；原始位元組一併交回
async fn parse_in_worker(bytes: Vec<u8>) -> Result<(Vec<u8>, Result<Vec<AddressRecord>>)> {
    tokio::task::spawn_blocking(move || {
        let parsed = parse_ban_csv(&bytes);
        (bytes, parsed)
    })
    .await
    .map_err(|e| TractError::WorkerError {
        message: e.to_string(),
    })
}

pub struct BanAddressRepository<S: Storage> {
    storage: S,
    client: Client,
    base_url: String,
    in_flight: SingleFlight<String, Arc<Vec<AddressRecord>>>,
}

impl<S: Storage> BanAddressRepository<S> {
    pub fn new(storage: S, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            storage,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            in_flight: SingleFlight::new(),
        })
    }

    fn file_name(department: &str) -> String {
        format!("adresses-{}.csv.gz", department)
    }

    async fn download(&self, department: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, Self::file_name(department));
        tracing::info!("🌐 Downloading address base for department {}", department);
        tracing::debug!("GET {}", url);

        let unavailable = |reason: String| TractError::DataUnavailable {
            department: department.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {} from {}", response.status(), url)));
        }

        let bytes = response.bytes().await.map_err(|e| unavailable(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn load_department(&self, department: &str) -> Result<Arc<Vec<AddressRecord>>> {
        let file_name = Self::file_name(department);

        if self.storage.exists(&file_name).await {
            tracing::info!("📁 Using cached {}", file_name);
            let bytes = self.storage.read_file(&file_name).await?;
            match parse_in_worker(bytes).await?.1 {
                Ok(records) => return Ok(Self::loaded(department, records)),
                Err(e) => {
                    // 壞掉的快取檔刪掉重抓
                    tracing::warn!("Discarding unreadable cache {}: {}", file_name, e);
                    self.storage.remove_file(&file_name).await?;
                }
            }
        }

        let bytes = self.download(department).await?;
        let (bytes, parsed) = parse_in_worker(bytes).await?;
        let records = parsed.map_err(|e| TractError::DataUnavailable {
            department: department.to_string(),
            reason: format!("downloaded file is not a valid address extract: {}", e),
        })?;

        // 解析成功才寫入快取
        self.storage.write_file(&file_name, &bytes).await?;
        tracing::debug!("Cached {} ({} bytes)", file_name, bytes.len());
        Ok(Self::loaded(department, records))
    }

    fn loaded(department: &str, records: Vec<AddressRecord>) -> Arc<Vec<AddressRecord>> {
        tracing::info!(
            "✅ Loaded {} addresses for department {}",
            records.len(),
            department
        );
        Arc::new(records)
    }
}

#[async_trait]
impl<S: Storage> AddressRepository for BanAddressRepository<S> {
    async fn get_addresses(&self, department_code: &str) -> Result<Arc<Vec<AddressRecord>>> {
        let department = validate_department(department_code)?;
        self.in_flight
            .run(department.clone(), || self.load_department(&department))
            .await
    }
}
