//! Document shapes for quotes, the vehicle catalog and the staged records
//! produced by a reconciliation run.

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::constants;
use crate::error::ReconcileError;

/// A human-entered code. Legacy documents hold either numbers or strings here.
///
/// Numbers written by the legacy shell scripts are doubles, so integral
/// doubles such as `5.0` read as `Number(5)`. Other doubles keep the text a
/// script would have produced when stringifying them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum AttributeCode {
    Number(i64),
    Text(String),
}

impl AttributeCode {
    /// Rendering used to compare against catalog `key` fields.
    pub fn as_key(&self) -> String {
        match self {
            AttributeCode::Number(n) => n.to_string(),
            AttributeCode::Text(s) => s.clone(),
        }
    }

    pub fn from_double(value: f64) -> Self {
        if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
            return AttributeCode::Number(value as i64);
        }
        let text = if value.is_nan() {
            "NaN".to_string()
        } else if value == f64::INFINITY {
            "Infinity".to_string()
        } else if value == f64::NEG_INFINITY {
            "-Infinity".to_string()
        } else {
            value.to_string()
        };
        AttributeCode::Text(text)
    }
}

impl<'de> Deserialize<'de> for AttributeCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CodeVisitor;

        impl<'de> Visitor<'de> for CodeVisitor {
            type Value = AttributeCode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a numeric or string code")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<AttributeCode, E> {
                Ok(AttributeCode::Number(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<AttributeCode, E> {
                Ok(i64::try_from(value)
                    .map(AttributeCode::Number)
                    .unwrap_or_else(|_| AttributeCode::Text(value.to_string())))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<AttributeCode, E> {
                Ok(AttributeCode::from_double(value))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<AttributeCode, E> {
                Ok(AttributeCode::Text(value.to_string()))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<AttributeCode, E> {
                Ok(AttributeCode::Text(value))
            }
        }

        deserializer.deserialize_any(CodeVisitor)
    }
}

/// Model years arrive as integers or integral doubles.
fn deserialize_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<AttributeCode>::deserialize(deserializer)? {
        None => Ok(None),
        Some(AttributeCode::Number(n)) => i32::try_from(n)
            .map(Some)
            .map_err(|_| de::Error::custom(format!("year {n} out of range"))),
        Some(AttributeCode::Text(t)) => Err(de::Error::custom(format!("year must be numeric, got {t:?}"))),
    }
}

impl fmt::Display for AttributeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl From<i64> for AttributeCode {
    fn from(value: i64) -> Self {
        AttributeCode::Number(value)
    }
}

impl From<&str> for AttributeCode {
    fn from(value: &str) -> Self {
        AttributeCode::Text(value.to_string())
    }
}

impl From<String> for AttributeCode {
    fn from(value: String) -> Self {
        AttributeCode::Text(value)
    }
}

/// Root quote document. Unknown fields are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    #[serde(rename = "_id")]
    pub quote_id: String,
    #[serde(default)]
    pub legacy_quotes: Vec<LegacyQuote>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyQuote {
    #[serde(rename = "_id")]
    pub legacy_quote_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_system: Option<AttributeCode>,
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    #[serde(rename = "_id")]
    pub asset_id: String,
    #[serde(default, deserialize_with = "deserialize_year", skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<AttributeCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<AttributeCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_style: Option<AttributeCode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AssetDescriptor {
    /// Sets make/model/bodyStyle to the canonical ids. Returns whether anything changed.
    pub fn apply_assignment(&mut self, assignment: &CanonicalAssignment) -> bool {
        let make = Some(AttributeCode::Text(assignment.make_id.clone()));
        let model = Some(AttributeCode::Text(assignment.model_id.clone()));
        let body_style = Some(AttributeCode::Text(assignment.body_style_id.clone()));

        if self.make == make && self.model == model && self.body_style == body_style {
            return false;
        }
        self.make = make;
        self.model = model;
        self.body_style = body_style;
        true
    }
}

impl QuoteRecord {
    /// Unwinds legacy quotes and their assets, keeping entries from `marker`'s system.
    pub fn legacy_assets(&self, marker: &AttributeCode) -> Vec<FlattenedAssetDescriptor> {
        self.legacy_quotes
            .iter()
            .filter(|lq| lq.source_system.as_ref() == Some(marker))
            .flat_map(|lq| {
                lq.assets
                    .iter()
                    .map(move |asset| FlattenedAssetDescriptor::new(&self.quote_id, &lq.legacy_quote_id, asset))
            })
            .collect()
    }

    pub fn asset_mut(&mut self, legacy_quote_id: &str, asset_id: &str) -> Option<&mut AssetDescriptor> {
        self.legacy_quotes
            .iter_mut()
            .find(|lq| lq.legacy_quote_id == legacy_quote_id)?
            .assets
            .iter_mut()
            .find(|a| a.asset_id == asset_id)
    }

    pub fn asset(&self, legacy_quote_id: &str, asset_id: &str) -> Option<&AssetDescriptor> {
        self.legacy_quotes
            .iter()
            .find(|lq| lq.legacy_quote_id == legacy_quote_id)?
            .assets
            .iter()
            .find(|a| a.asset_id == asset_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterStatus {
    Active,
    Inactive,
    #[serde(other)]
    Other,
}

/// Root of a catalog version, scoped to a set of jurisdictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleMaster {
    #[serde(rename = "_id")]
    pub id: String,
    pub status: MasterStatus,
    #[serde(default)]
    pub states: Vec<String>,
}

impl VehicleMaster {
    pub fn is_eligible(&self, jurisdiction: &str) -> bool {
        self.status == MasterStatus::Active && self.states.iter().any(|s| s == jurisdiction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterRef {
    pub id: String,
}

/// A keyed catalog node: `key` is the legacy code, `_id` the canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogNode {
    #[serde(rename = "_id")]
    pub id: String,
    pub key: String,
}

/// Models grouped under the make whose id equals `make_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFamily {
    #[serde(rename = "_id")]
    pub make_id: String,
    #[serde(default)]
    pub models: Vec<CatalogNode>,
}

/// Body styles linked to the model whose id equals `model_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyStyleGroup {
    #[serde(rename = "_id")]
    pub model_id: String,
    #[serde(default)]
    pub body_styles: Vec<CatalogNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleCatalogVersion {
    pub version_id: String,
    pub year: i32,
    #[serde(default)]
    pub makes: Vec<CatalogNode>,
    #[serde(default)]
    pub models: Vec<ModelFamily>,
    #[serde(default)]
    pub body_styles: Vec<BodyStyleGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAssignment {
    pub make_id: String,
    pub model_id: String,
    pub body_style_id: String,
}

/// One (quote, legacy quote, asset) triple as read from the store, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenedAssetDescriptor {
    pub quote_id: String,
    pub legacy_quote_id: String,
    pub asset_id: String,
    pub year: Option<i32>,
    pub make: Option<AttributeCode>,
    pub model: Option<AttributeCode>,
    pub body_style: Option<AttributeCode>,
}

impl FlattenedAssetDescriptor {
    pub fn new(quote_id: &str, legacy_quote_id: &str, asset: &AssetDescriptor) -> Self {
        Self {
            quote_id: quote_id.to_string(),
            legacy_quote_id: legacy_quote_id.to_string(),
            asset_id: asset.asset_id.clone(),
            year: asset.year,
            make: asset.make.clone(),
            model: asset.model.clone(),
            body_style: asset.body_style.clone(),
        }
    }
}

/// Legacy assets read from the quote store, plus entries that could not be decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyScan {
    pub descriptors: Vec<FlattenedAssetDescriptor>,
    pub unreadable: Vec<SkippedCandidate>,
}

impl LegacyScan {
    pub fn from_descriptors(descriptors: Vec<FlattenedAssetDescriptor>) -> Self {
        Self {
            descriptors,
            unreadable: Vec::new(),
        }
    }

    pub fn extend(&mut self, other: LegacyScan) {
        self.descriptors.extend(other.descriptors);
        self.unreadable.extend(other.unreadable);
    }

    /// Unwinds one raw quote document, decoding each asset on its own.
    ///
    /// A damaged entry is reported against its quote and the readable
    /// siblings are still returned.
    pub fn from_document(quote_id: &str, doc: &Value, marker: &AttributeCode) -> Self {
        let mut scan = Self::default();
        let legacy_quotes = match doc.get("legacyQuotes") {
            None | Some(Value::Null) => return scan,
            Some(Value::Array(items)) => items,
            Some(_) => {
                scan.unreadable
                    .push(SkippedCandidate::unreadable(quote_id, "", "", "legacyQuotes is not an array"));
                return scan;
            }
        };

        for legacy_quote in legacy_quotes {
            let Some(legacy_quote_id) = legacy_quote.get("_id").and_then(Value::as_str) else {
                scan.unreadable
                    .push(SkippedCandidate::unreadable(quote_id, "", "", "legacy quote without a string _id"));
                continue;
            };
            let source_system = legacy_quote
                .get("sourceSystem")
                .and_then(|v| AttributeCode::deserialize(v).ok());
            if source_system.as_ref() != Some(marker) {
                continue;
            }

            let assets = match legacy_quote.get("assets") {
                None | Some(Value::Null) => continue,
                Some(Value::Array(assets)) => assets,
                Some(_) => {
                    scan.unreadable.push(SkippedCandidate::unreadable(
                        quote_id,
                        legacy_quote_id,
                        "",
                        "assets is not an array",
                    ));
                    continue;
                }
            };

            for raw in assets {
                match AssetDescriptor::deserialize(raw) {
                    Ok(asset) => scan
                        .descriptors
                        .push(FlattenedAssetDescriptor::new(quote_id, legacy_quote_id, &asset)),
                    Err(e) => scan.unreadable.push(SkippedCandidate::unreadable(
                        quote_id,
                        legacy_quote_id,
                        raw.get("_id").and_then(Value::as_str).unwrap_or_default(),
                        e.to_string(),
                    )),
                }
            }
        }
        scan
    }
}

/// Locates one embedded asset inside a raw quote document.
pub fn asset_entry_mut<'a>(doc: &'a mut Value, legacy_quote_id: &str, asset_id: &str) -> Option<&'a mut Value> {
    doc.get_mut("legacyQuotes")?
        .as_array_mut()?
        .iter_mut()
        .find(|lq| lq.get("_id").and_then(Value::as_str) == Some(legacy_quote_id))?
        .get_mut("assets")?
        .as_array_mut()?
        .iter_mut()
        .find(|a| a.get("_id").and_then(Value::as_str) == Some(asset_id))
}

/// A flattened descriptor with every attribute the matcher needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedCandidate {
    pub quote_id: String,
    pub legacy_quote_id: String,
    pub asset_id: String,
    pub year: i32,
    pub make: AttributeCode,
    pub model: AttributeCode,
    pub body_style: AttributeCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Required attributes that were absent or null.
    Missing(Vec<&'static str>),
    /// The stored entry could not be decoded.
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Missing(fields) => write!(f, "lacks {}", fields.join(", ")),
            SkipReason::Unreadable(error) => write!(f, "is unreadable: {}", error),
        }
    }
}

/// Report for a descriptor dropped during extraction.
///
/// `legacy_quote_id` and `asset_id` are empty when the damage sits above that level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCandidate {
    pub quote_id: String,
    pub legacy_quote_id: String,
    pub asset_id: String,
    pub reason: SkipReason,
}

impl SkippedCandidate {
    pub fn unreadable(quote_id: &str, legacy_quote_id: &str, asset_id: &str, error: impl Into<String>) -> Self {
        Self {
            quote_id: quote_id.to_string(),
            legacy_quote_id: legacy_quote_id.to_string(),
            asset_id: asset_id.to_string(),
            reason: SkipReason::Unreadable(error.into()),
        }
    }
}

impl fmt::Display for SkippedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quote {}", self.quote_id)?;
        if !self.legacy_quote_id.is_empty() {
            write!(f, " legacy quote {}", self.legacy_quote_id)?;
        }
        if !self.asset_id.is_empty() {
            write!(f, " asset {}", self.asset_id)?;
        }
        write!(f, " {}", self.reason)
    }
}

impl TryFrom<FlattenedAssetDescriptor> for ValidatedCandidate {
    type Error = ReconcileError;

    fn try_from(d: FlattenedAssetDescriptor) -> Result<Self, Self::Error> {
        let mut missing = Vec::new();
        if d.year.is_none() {
            missing.push("year");
        }
        if d.make.is_none() {
            missing.push("make");
        }
        if d.model.is_none() {
            missing.push("model");
        }
        if d.body_style.is_none() {
            missing.push("bodyStyle");
        }

        match (d.year, d.make, d.model, d.body_style) {
            (Some(year), Some(make), Some(model), Some(body_style)) => Ok(Self {
                quote_id: d.quote_id,
                legacy_quote_id: d.legacy_quote_id,
                asset_id: d.asset_id,
                year,
                make,
                model,
                body_style,
            }),
            _ => Err(ReconcileError::MissingDescriptor(SkippedCandidate {
                quote_id: d.quote_id,
                legacy_quote_id: d.legacy_quote_id,
                asset_id: d.asset_id,
                reason: SkipReason::Missing(missing),
            })),
        }
    }
}

/// Identifier scoping every staged record written by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RunId)
    }
}

/// Canonicalized asset values staged for application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuoteRecord {
    pub staging_id: Uuid,
    pub run_id: RunId,
    pub quote_id: String,
    pub legacy_quote_id: String,
    pub asset_id: String,
    pub year: i32,
    pub make: String,
    pub model: String,
    pub body_style: String,
    pub staged_at: DateTime<Utc>,
}

impl NewQuoteRecord {
    pub fn assignment(&self) -> CanonicalAssignment {
        CanonicalAssignment {
            make_id: self.make.clone(),
            model_id: self.model.clone(),
            body_style_id: self.body_style.clone(),
        }
    }
}

/// Before/after audit entry. Never applied to the quote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLogRecord {
    pub staging_id: Uuid,
    pub run_id: RunId,
    pub quote_id: String,
    pub legacy_quote_id: String,
    pub asset_id: String,
    pub year: i32,
    pub make_old: AttributeCode,
    pub make: String,
    pub model_old: AttributeCode,
    pub model: String,
    pub body_style_old: AttributeCode,
    pub body_style: String,
    pub staged_at: DateTime<Utc>,
}

/// The two staged records produced for one catalog match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPair {
    pub new_record: NewQuoteRecord,
    pub update_log: UpdateLogRecord,
}

impl StagedPair {
    pub fn build(run_id: RunId, candidate: &ValidatedCandidate, assignment: &CanonicalAssignment) -> Self {
        let staging_id = Uuid::new_v4();
        let staged_at = Utc::now();

        let new_record = NewQuoteRecord {
            staging_id,
            run_id,
            quote_id: candidate.quote_id.clone(),
            legacy_quote_id: candidate.legacy_quote_id.clone(),
            asset_id: candidate.asset_id.clone(),
            year: candidate.year,
            make: assignment.make_id.clone(),
            model: assignment.model_id.clone(),
            body_style: assignment.body_style_id.clone(),
            staged_at,
        };

        let update_log = UpdateLogRecord {
            staging_id,
            run_id,
            quote_id: candidate.quote_id.clone(),
            legacy_quote_id: candidate.legacy_quote_id.clone(),
            asset_id: candidate.asset_id.clone(),
            year: candidate.year,
            make_old: candidate.make.clone(),
            make: assignment.make_id.clone(),
            model_old: candidate.model.clone(),
            model: assignment.model_id.clone(),
            body_style_old: candidate.body_style.clone(),
            body_style: assignment.body_style_id.clone(),
            staged_at,
        };

        Self {
            new_record,
            update_log,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingStore {
    NewValues,
    AuditLog,
}

impl StagingStore {
    pub fn collection_name(&self) -> &'static str {
        match self {
            StagingStore::NewValues => constants::NEW_QUOTES,
            StagingStore::AuditLog => constants::UPDATE_LOG,
        }
    }
}

impl fmt::Display for StagingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StagingRecord {
    AuditLog(UpdateLogRecord),
    NewValues(NewQuoteRecord),
}

impl StagingRecord {
    pub fn store(&self) -> StagingStore {
        match self {
            StagingRecord::NewValues(_) => StagingStore::NewValues,
            StagingRecord::AuditLog(_) => StagingStore::AuditLog,
        }
    }

    pub fn staging_id(&self) -> Uuid {
        match self {
            StagingRecord::NewValues(r) => r.staging_id,
            StagingRecord::AuditLog(r) => r.staging_id,
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            StagingRecord::NewValues(r) => r.run_id,
            StagingRecord::AuditLog(r) => r.run_id,
        }
    }
}

/// Match-stage result recorded per run, read back before applying a staged run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub run_id: RunId,
    pub match_success: bool,
    pub completed_at: DateTime<Utc>,
}

impl RunStatus {
    pub fn new(run_id: RunId, match_success: bool) -> Self {
        Self {
            run_id,
            match_success,
            completed_at: Utc::now(),
        }
    }
}

/// Result of a targeted quote update. `matched` is false when no document had the triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched: bool,
    pub modified: bool,
}
