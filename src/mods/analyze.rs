use anyhow::{ bail, Context, Result };
use crossbeam_channel::{ bounded, unbounded };
use std::{ collections::HashSet, fs, path::{ Path, PathBuf }, sync::Arc, thread };

use crate::{
    integrity::ChainOfCustody,
    logger::Logger,
    params::AnalysisParams,
    pipeline::{ asset_id_for, AnalyzedFile, Pipeline },
    report::{ append_summary_csv, to_markdown, AnalysisReport },
    ReportFormat,
};

/// Asset id per input, in input order. A stem already taken by an earlier
/// input gets the first free `-2`, `-3`, ... suffix.
pub fn assign_asset_ids(inputs: &[PathBuf]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(inputs.len());
    inputs
        .iter()
        .map(|path| {
            let stem = asset_id_for(path);
            let mut id = stem.clone();
            let mut n = 2usize;
            while taken.contains(&id) {
                id = format!("{}-{}", stem, n);
                n += 1;
            }
            taken.insert(id.clone());
            id
        })
        .collect()
}

fn write_custody(custody: &ChainOfCustody, asset_id: &str, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!("{}_custody.json", asset_id));
    fs::write(&path, serde_json::to_string_pretty(custody)?).with_context(||
        format!("writing {}", path.display())
    )?;
    Ok(path)
}

/// Write the requested renderings of `report` into `dir`; returns the paths written.
fn write_outputs(report: &AnalysisReport, dir: &Path, formats: &[ReportFormat]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let path = dir.join(format!("{}_report.{}", report.asset_id, format.extension()));
        let body = match format {
            ReportFormat::Json => report.to_json_pretty()?,
            ReportFormat::Markdown => to_markdown(report),
        };
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

/// Analyze mode. Each worker owns its own pipeline; the collecting thread
/// does all output writing so the summary CSV has a single writer.
pub fn run_analyze(cli: &crate::Config, logger: Arc<Logger>) -> Result<()> {
    let params = match &cli.params_path {
        Some(p) => AnalysisParams::from_json_file(p)?,
        None => AnalysisParams::default(),
    };
    fs::create_dir_all(&cli.output_dir).with_context(||
        format!("creating output dir {}", cli.output_dir.display())
    )?;

    let workers = cli.jobs.clamp(1, cli.inputs.len().max(1));
    if let Some(log_file) = logger.file_path() {
        crate::log_debug!(logger, "log file {}", log_file.display())?;
    }
    logger.info(
        &format!(
            "voice-coherence {} analyzing {} file(s) on {} worker(s) at {} Hz → {}",
            cli.pipeline_version,
            cli.inputs.len(),
            workers,
            cli.working_sr,
            cli.output_dir.display()
        )
    )?;

    let asset_ids = assign_asset_ids(&cli.inputs);
    let (tx_job, rx_job) = bounded::<(PathBuf, String)>(cli.inputs.len().max(1));
    let (tx_done, rx_done) = unbounded::<(PathBuf, String, Result<AnalyzedFile>)>();
    for (input, asset_id) in cli.inputs.iter().zip(asset_ids) {
        if asset_id != asset_id_for(input) {
            crate::log_warn!(logger, "duplicate file stem: {} is reported as {}", input.display(), asset_id)?;
        }
        tx_job.send((input.clone(), asset_id))?;
    }
    drop(tx_job);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx_job = rx_job.clone();
        let tx_done = tx_done.clone();
        let pipeline = Pipeline::new(
            params.clone(),
            &cli.pipeline_version,
            cli.working_sr,
            logger.clone()
        ).with_analyst_id(cli.analyst_id.clone());
        handles.push(
            thread::spawn(move || {
                for (path, asset_id) in rx_job.iter() {
                    let result = pipeline.analyze_file(&path, &asset_id);
                    if tx_done.send((path, asset_id, result)).is_err() {
                        break;
                    }
                }
            })
        );
    }
    drop(tx_done);

    let mut failed = 0usize;
    let mut done = 0usize;
    for (path, asset_id, result) in rx_done.iter() {
        let outcome = result.and_then(|AnalyzedFile { report, custody }| {
            let mut written = write_outputs(&report, &cli.output_dir, &cli.formats)?;
            written.push(write_custody(&custody, &report.asset_id, &cli.output_dir)?);
            if let Some(csv) = &cli.summary_csv {
                append_summary_csv(csv, &report)?;
            }
            Ok((report, written))
        });
        match outcome {
            Ok((report, written)) => {
                done += 1;
                crate::log_info!(
                    logger,
                    "[{}] alteration={} confidence={:.2} ({}) ai={} ({}) → {}",
                    report.asset_id,
                    report.alteration_detected,
                    report.confidence_score,
                    report.confidence_label,
                    report.ai_voice_detected,
                    report.ai_type,
                    written
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )?;
            }
            Err(e) => {
                failed += 1;
                crate::log_error!(logger, "[{}] {}: {:#}", asset_id, path.display(), e)?;
            }
        }
    }

    for h in handles {
        if h.join().is_err() {
            failed += 1;
            logger.error("an analysis worker panicked")?;
        }
    }

    logger.info(&format!("analysis finished: {} ok, {} failed", done, failed))?;
    if failed > 0 {
        bail!("{} of {} input(s) failed", failed, cli.inputs.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::write_wav;
    use crate::integrity::IntegrityVerifier;
    use crate::phases::baseline::tests::tone;

    #[test]
    fn bad_input_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.wav");
        write_wav(&good, 16_000, 1, &tone(140.0, 16_000, 1.0, 0.5));
        let out = dir.path().join("out");
        let csv = dir.path().join("summary.csv");

        let cli = crate::Config {
            inputs: vec![good, dir.path().join("missing.wav")],
            output_dir: out.clone(),
            summary_csv: Some(csv.clone()),
            jobs: 2,
            log_path: None,
            pipeline_version: "batch-test".into(),
            ..Default::default()
        };
        let err = run_analyze(&cli, Arc::new(Logger::silent())).unwrap_err();
        assert!(err.to_string().contains("1 of 2"));

        let json = fs::read_to_string(out.join("good_report.json")).unwrap();
        assert!(IntegrityVerifier::new("any").verify_str(&json).valid);
        let md = fs::read_to_string(out.join("good_report.md")).unwrap();
        assert!(md.contains("good"));
        assert!(!out.join("missing_report.json").exists());
        assert!(!out.join("missing_custody.json").exists());

        let custody: ChainOfCustody = serde_json::from_str(
            &fs::read_to_string(out.join("good_custody.json")).unwrap()
        ).unwrap();
        assert_eq!(custody.analyst_id, "AUTOMATED");
        assert_eq!(custody.evidence.format, ".wav");
        assert_eq!(custody.custody_id.len(), 16);

        let rows = fs::read_to_string(&csv).unwrap();
        assert_eq!(rows.lines().count(), 2);
        assert!(rows.lines().nth(1).unwrap().starts_with("good,"));
    }

    #[test]
    fn json_only_format_skips_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("take.wav");
        write_wav(&input, 22_050, 2, &tone(200.0, 22_050, 1.0, 0.3)
                .iter()
                .flat_map(|&s| [s, s])
                .collect::<Vec<f32>>());

        let cli = crate::Config {
            inputs: vec![input],
            output_dir: dir.path().to_path_buf(),
            formats: vec![ReportFormat::Json],
            jobs: 1,
            log_path: None,
            ..Default::default()
        };
        run_analyze(&cli, Arc::new(Logger::silent())).unwrap();
        assert!(dir.path().join("take_report.json").exists());
        assert!(!dir.path().join("take_report.md").exists());
        assert!(dir.path().join("take_custody.json").exists());
    }

    #[test]
    fn duplicate_stems_get_distinct_ids() {
        let ids = assign_asset_ids(
            &[
                PathBuf::from("a/voice.wav"),
                PathBuf::from("b/voice.wav"),
                PathBuf::from("voice-2.mp3"),
                PathBuf::from("c/voice.flac"),
            ]
        );
        assert_eq!(ids, ["voice", "voice-2", "voice-2-2", "voice-3"]);
    }

    #[test]
    fn same_stem_in_two_folders_keeps_both_reports() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        let first = dir.path().join("a").join("voice.wav");
        let second = dir.path().join("b").join("voice.wav");
        write_wav(&first, 16_000, 1, &tone(140.0, 16_000, 1.0, 0.5));
        write_wav(&second, 16_000, 1, &tone(230.0, 16_000, 1.0, 0.5));
        let out = dir.path().join("out");
        let csv = dir.path().join("summary.csv");

        let cli = crate::Config {
            inputs: vec![first, second],
            output_dir: out.clone(),
            formats: vec![ReportFormat::Json],
            summary_csv: Some(csv.clone()),
            analyst_id: Some("examiner-7".into()),
            jobs: 2,
            log_path: None,
            ..Default::default()
        };
        run_analyze(&cli, Arc::new(Logger::silent())).unwrap();

        let a: AnalysisReport = serde_json::from_str(&fs::read_to_string(out.join("voice_report.json")).unwrap()).unwrap();
        let b: AnalysisReport = serde_json::from_str(&fs::read_to_string(out.join("voice-2_report.json")).unwrap()).unwrap();
        assert_eq!(a.asset_id, "voice");
        assert_eq!(b.asset_id, "voice-2");
        let (va, vb) = (a.verification.unwrap(), b.verification.unwrap());
        assert_ne!(va.audio_file_hash_sha256, vb.audio_file_hash_sha256);
        assert_ne!(va.report_hash_sha256, vb.report_hash_sha256);
        assert!(out.join("voice-2_custody.json").exists());

        let rows = fs::read_to_string(&csv).unwrap();
        assert_eq!(rows.lines().count(), 3);
    }
}
