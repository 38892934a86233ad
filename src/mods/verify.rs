use anyhow::{ bail, Context, Result };
use std::{ fs, sync::Arc };

use crate::{ decode, integrity::{ AudioFingerprint, IntegrityVerifier, VerifyOutcome }, logger::Logger };

/// Verify mode: recompute the report hash of `--report` and, when an
/// `--input` is given, compare the stored audio hashes against that file.
pub fn run_verify(cli: &crate::Config, logger: Arc<Logger>) -> Result<()> {
    let Some(report_path) = &cli.report_path else {
        bail!("no --report given");
    };
    let json = fs::read_to_string(report_path).with_context(||
        format!("reading report {}", report_path.display())
    )?;
    let verifier = IntegrityVerifier::new(cli.pipeline_version.as_str());

    let outcome = match cli.inputs.first() {
        Some(audio_path) => {
            let audio = decode::load(audio_path).with_context(||
                format!("loading {}", audio_path.display())
            )?;
            logger.info(&format!("re-hashing audio {}", audio_path.display()))?;
            verifier.verify_audio(&json, &AudioFingerprint::of(&audio))
        }
        None => verifier.verify_str(&json),
    };

    report_outcome(&outcome, &logger, &report_path.display().to_string())?;
    println!("{}", serde_json::to_string(&outcome)?);

    if !outcome.valid {
        bail!("{} failed verification: {}", report_path.display(), outcome.reason_str());
    }
    Ok(())
}

fn report_outcome(outcome: &VerifyOutcome, logger: &Logger, name: &str) -> Result<()> {
    if outcome.valid {
        crate::log_info!(logger, "{}: verification passed", name)?;
    } else {
        logger.warn(&format!("{}: verification FAILED ({})", name, outcome.reason_str()))?;
    }
    Ok(())
}
