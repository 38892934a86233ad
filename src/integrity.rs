//! Tamper evidence for saved reports.
//!
//! The report hash covers the canonical JSON of the report with the
//! `verification` key removed: keys sorted, floats already rounded to four
//! decimals by the synthesizer. There is no key material, so this detects
//! edits to a report file, not impersonation of whoever produced it.

use anyhow::Result;
use chrono::{ DateTime, SecondsFormat, Utc };
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use sha2::{ Digest, Sha256 };
use std::path::Path;

use crate::decode::{ LoadedAudio, Waveform };
use crate::report::AnalysisReport;

pub const PROTOCOL: &str = "FORENSIC-AUDIO-v1";
const VERIFICATION_KEY: &str = "verification";
pub const DEFAULT_ANALYST_ID: &str = "AUTOMATED";
const EVIDENCE_TYPE: &str = "AUDIO_RECORDING";
const CUSTODY_METHOD: &str = "MULTI-PHASE-FORENSIC-ANALYSIS";
const CUSTODY_ID_LEN: usize = 16;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationBlock {
    pub timestamp_utc: String,
    pub audio_file_hash_sha256: String,
    pub audio_waveform_hash_sha256: String,
    pub report_hash_sha256: String,
    pub pipeline_version: String,
    pub audio_file_name: String,
    pub audio_file_size_bytes: u64,
    pub protocol: String,
}

/// Custody record written next to a report: who analyzed which file, when,
/// and what the analysis concluded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainOfCustody {
    pub custody_id: String,
    pub acquisition_timestamp: String,
    pub analyst_id: String,
    pub evidence: CustodyEvidence,
    pub analysis: CustodyAnalysis,
    pub integrity_verified: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustodyEvidence {
    #[serde(rename = "type")]
    pub evidence_type: String,
    /// File suffix with its leading dot; empty when the file has none.
    pub format: String,
    pub hash_sha256: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustodyAnalysis {
    pub alteration_detected: bool,
    pub confidence: f64,
    pub confidence_label: String,
    pub method: String,
}

/// Hashes of one input: the file as stored and its decoded mono samples.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFingerprint {
    pub file_name: String,
    pub file_size_bytes: u64,
    pub file_hash: String,
    pub waveform_hash: String,
}

impl AudioFingerprint {
    pub fn of(audio: &LoadedAudio) -> Self {
        Self::from_parts(audio.file_name(), &audio.bytes, &audio.native)
    }

    pub fn from_parts(file_name: String, bytes: &[u8], waveform: &Waveform) -> Self {
        Self {
            file_name,
            file_size_bytes: bytes.len() as u64,
            file_hash: sha256_hex(bytes),
            waveform_hash: sha256_hex(&waveform.sample_bytes()),
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Sorted-key compact JSON of `value` without its top-level `verification` entry.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let mut tree = serde_json::to_value(value)?;
    Ok(canonical_value(&mut tree))
}

fn canonical_value(tree: &mut Value) -> String {
    if let Some(map) = tree.as_object_mut() {
        map.remove(VERIFICATION_KEY);
    }
    // serde_json's default map is ordered by key
    tree.to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyFailure {
    Malformed,
    Unsigned,
    Tampered,
    AudioModified,
}

impl VerifyFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyFailure::Malformed => "malformed",
            VerifyFailure::Unsigned => "unsigned",
            VerifyFailure::Tampered => "tampered",
            VerifyFailure::AudioModified => "audio_modified",
        }
    }
}

/// Never an error: reports under verification are untrusted input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub reason: Option<VerifyFailure>,
}

impl VerifyOutcome {
    fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    fn fail(reason: VerifyFailure) -> Self {
        Self { valid: false, reason: Some(reason) }
    }

    pub fn reason_str(&self) -> &'static str {
        self.reason.map(|r| r.as_str()).unwrap_or("ok")
    }
}

pub struct IntegrityVerifier {
    pipeline_version: String,
}

impl IntegrityVerifier {
    pub fn new(pipeline_version: impl Into<String>) -> Self {
        Self { pipeline_version: pipeline_version.into() }
    }

    pub fn sign(&self, report: AnalysisReport, audio: &AudioFingerprint) -> Result<AnalysisReport> {
        self.sign_at(report, audio, Utc::now())
    }

    /// Attach the verification block. Any previous block is dropped first.
    pub fn sign_at(
        &self,
        mut report: AnalysisReport,
        audio: &AudioFingerprint,
        now: DateTime<Utc>
    ) -> Result<AnalysisReport> {
        report.verification = None;
        let report_hash = sha256_hex(canonical_json(&report)?.as_bytes());
        report.verification = Some(VerificationBlock {
            timestamp_utc: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            audio_file_hash_sha256: audio.file_hash.clone(),
            audio_waveform_hash_sha256: audio.waveform_hash.clone(),
            report_hash_sha256: report_hash,
            pipeline_version: self.pipeline_version.clone(),
            audio_file_name: audio.file_name.clone(),
            audio_file_size_bytes: audio.file_size_bytes,
            protocol: PROTOCOL.to_string(),
        });
        Ok(report)
    }

    pub fn chain_of_custody(
        &self,
        audio_path: &Path,
        audio: &AudioFingerprint,
        report: &AnalysisReport,
        analyst_id: Option<&str>
    ) -> ChainOfCustody {
        self.chain_of_custody_at(audio_path, audio, report, analyst_id, Utc::now())
    }

    /// The custody id hashes the input path with the acquisition time, so two
    /// records for the same file differ unless they share a timestamp.
    pub fn chain_of_custody_at(
        &self,
        audio_path: &Path,
        audio: &AudioFingerprint,
        report: &AnalysisReport,
        analyst_id: Option<&str>,
        now: DateTime<Utc>
    ) -> ChainOfCustody {
        let acquired = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut custody_id = sha256_hex(format!("{}{}", audio_path.display(), acquired).as_bytes());
        custody_id.truncate(CUSTODY_ID_LEN);
        let format = audio_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        ChainOfCustody {
            custody_id,
            acquisition_timestamp: acquired,
            analyst_id: analyst_id
                .filter(|a| !a.trim().is_empty())
                .unwrap_or(DEFAULT_ANALYST_ID)
                .to_string(),
            evidence: CustodyEvidence {
                evidence_type: EVIDENCE_TYPE.to_string(),
                format,
                hash_sha256: audio.file_hash.clone(),
            },
            analysis: CustodyAnalysis {
                alteration_detected: report.alteration_detected,
                confidence: report.confidence_score,
                confidence_label: report.confidence_label.to_string(),
                method: CUSTODY_METHOD.to_string(),
            },
            integrity_verified: true,
        }
    }

    pub fn verify_str(&self, json: &str) -> VerifyOutcome {
        match serde_json::from_str::<Value>(json) {
            Ok(value) => self.verify_value(&value),
            Err(_) => VerifyOutcome::fail(VerifyFailure::Malformed),
        }
    }

    pub fn verify_value(&self, value: &Value) -> VerifyOutcome {
        let Some(map) = value.as_object() else {
            return VerifyOutcome::fail(VerifyFailure::Malformed);
        };
        let stored = match map.get(VERIFICATION_KEY) {
            None | Some(Value::Null) => {
                return VerifyOutcome::fail(VerifyFailure::Unsigned);
            }
            Some(block) => block.get("report_hash_sha256").and_then(Value::as_str),
        };
        let Some(stored) = stored else {
            return VerifyOutcome::fail(VerifyFailure::Malformed);
        };

        let mut tree = value.clone();
        let recomputed = sha256_hex(canonical_value(&mut tree).as_bytes());
        if recomputed == stored {
            VerifyOutcome::ok()
        } else {
            VerifyOutcome::fail(VerifyFailure::Tampered)
        }
    }

    /// Report check plus a comparison of both stored audio hashes with `audio`.
    pub fn verify_audio(&self, json: &str, audio: &AudioFingerprint) -> VerifyOutcome {
        let outcome = self.verify_str(json);
        if !outcome.valid {
            return outcome;
        }
        let Ok(value) = serde_json::from_str::<Value>(json) else {
            return VerifyOutcome::fail(VerifyFailure::Malformed);
        };
        let block = &value[VERIFICATION_KEY];
        let file_hash = block["audio_file_hash_sha256"].as_str();
        let waveform_hash = block["audio_waveform_hash_sha256"].as_str();
        if file_hash == Some(audio.file_hash.as_str()) && waveform_hash == Some(audio.waveform_hash.as_str()) {
            VerifyOutcome::ok()
        } else {
            VerifyOutcome::fail(VerifyFailure::AudioModified)
        }
    }
}
