use crate::core::normalize::normalize;
use crate::domain::model::Municipality;
use crate::utils::error::{Result, TractError};
use crate::utils::validation::{normalize_postal_code, validate_department};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

const NAME_COLUMNS: [&str; 4] = ["nom_standard", "nom_commune", "name", "nom"];
const POSTAL_COLUMNS: [&str; 3] = ["code_postal", "postal_code", "cp"];
const DEPARTMENT_COLUMNS: [&str; 4] = ["dep_code", "department_code", "code_departement", "dep"];

impl Municipality {
    pub fn new(name: &str, postal_code: &str, department_code: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            postal_code: postal_code.trim().to_string(),
            department_code: department_code.trim().to_string(),
            normalized_name: normalize(name),
        }
    }
}

/// Read-only table of municipalities, built once and shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct MunicipalityIndex {
    municipalities: Vec<Arc<Municipality>>,
    by_postal_code: HashMap<String, Vec<usize>>,
}

impl MunicipalityIndex {
    pub fn from_municipalities(municipalities: Vec<Municipality>) -> Self {
        let municipalities: Vec<Arc<Municipality>> =
            municipalities.into_iter().map(Arc::new).collect();

        let mut by_postal_code: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, m) in municipalities.iter().enumerate() {
            by_postal_code.entry(m.postal_code.clone()).or_default().push(i);
        }

        Self {
            municipalities,
            by_postal_code,
        }
    }

    /// 讀取市鎮資料檔（CSV，可為 .gz 壓縮），分隔符號自動判斷
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("📂 Loading municipality index from {}", path.display());

        let file = File::open(path)?;
        let is_gzip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        let index = if is_gzip {
            Self::from_reader(GzDecoder::new(file))?
        } else {
            Self::from_reader(file)?
        };

        tracing::info!("✅ Loaded {} municipalities", index.len());
        Ok(index)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = BufReader::new(reader);

        let delimiter = {
            let head = reader.fill_buf()?;
            let first_line = head.split(|&b| b == b'\n').next().unwrap_or(&[]);
            if first_line.contains(&b';') {
                b';'
            } else {
                b','
            }
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let column = |candidates: &[&str], label: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| candidates.contains(&h.trim().to_lowercase().as_str()))
                .ok_or_else(|| TractError::DataFormat {
                    message: format!(
                        "missing {} column (expected one of: {})",
                        label,
                        candidates.join(", ")
                    ),
                })
        };
        let name_col = column(&NAME_COLUMNS, "name")?;
        let postal_col = column(&POSTAL_COLUMNS, "postal code")?;
        let dep_col = column(&DEPARTMENT_COLUMNS, "department code")?;

        let mut municipalities = Vec::new();
        let mut skipped = 0usize;
        for record in csv_reader.records() {
            let record = record?;
            let name = record.get(name_col).unwrap_or("").trim();
            let postal = record.get(postal_col).and_then(normalize_postal_code);
            let dep = record.get(dep_col).unwrap_or("").trim();

            match postal {
                Some(postal) if !name.is_empty() && !dep.is_empty() => {
                    // 無效的省代碼保留原值，解析時再剔除並記錄
                    let dep = validate_department(dep).unwrap_or_else(|_| dep.to_uppercase());
                    municipalities.push(Municipality::new(name, &postal, &dep));
                }
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::warn!("Skipped {} municipality rows with missing fields", skipped);
        }

        Ok(Self::from_municipalities(municipalities))
    }

    pub fn lookup_by_postal_code(&self, code: &str) -> Vec<Arc<Municipality>> {
        let Some(code) = normalize_postal_code(code) else {
            return Vec::new();
        };
        self.by_postal_code
            .get(&code)
            .map(|ids| ids.iter().map(|&i| Arc::clone(&self.municipalities[i])).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Municipality>> {
        self.municipalities.iter()
    }

    pub fn len(&self) -> usize {
        self.municipalities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.municipalities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SAMPLE: &str = "nom_standard,code_postal,dep_code\n\
Marseille,13001,13\n\
Saint-Denis,97400,974\n\
Ajaccio,20000,2A\n\
Bourg-en-Bresse,1000,1\n";

    #[test]
    fn test_from_reader_parses_and_pads_codes() {
        let index = MunicipalityIndex::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(index.len(), 4);

        let bourg = index.lookup_by_postal_code("01000");
        assert_eq!(bourg.len(), 1);
        assert_eq!(bourg[0].department_code, "01");
        assert_eq!(bourg[0].normalized_name, "bourg en bresse");
    }

    #[test]
    fn test_semicolon_delimiter_and_alias_headers() {
        let data = "nom_commune;postal_code;code_departement\nLyon;69001;69\n";
        let index = MunicipalityIndex::from_reader(data.as_bytes()).unwrap();
        assert_eq!(index.lookup_by_postal_code("69001")[0].name, "Lyon");
    }

    #[test]
    fn test_missing_column_is_data_format_error() {
        let data = "nom_standard,code_postal\nLyon,69001\n";
        let err = MunicipalityIndex::from_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, TractError::DataFormat { .. }));
    }

    #[test]
    fn test_lookup_unknown_postal_code_is_empty() {
        let index = MunicipalityIndex::from_reader(SAMPLE.as_bytes()).unwrap();
        assert!(index.lookup_by_postal_code("75001").is_empty());
        assert!(index.lookup_by_postal_code("not-a-code").is_empty());
    }

    #[test]
    fn test_load_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("communes.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let index = MunicipalityIndex::load(&path).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.lookup_by_postal_code("20000")[0].department_code, "2A");
    }
}
