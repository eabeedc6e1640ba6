//! Running the capability probe battery against a backend.

use std::fs;
use std::path::Path;

use prime_core::governor::{CapabilityRecord, Probe};
use tracing::{debug, info};

use crate::backend::LlmBackend;
use crate::error::AgentError;

pub const PROBES_DIR: &str = "probes";

/// Send every probe to `backend` and score the replies. With `transcripts`
/// set, each probe's prompt, reply and score go to `<dir>/<probe file>`.
pub async fn run_probes(
    backend: &dyn LlmBackend,
    transcripts: Option<&Path>,
) -> Result<CapabilityRecord, AgentError> {
    if let Some(dir) = transcripts {
        fs::create_dir_all(dir)?;
    }
    let mut scores = Vec::with_capacity(Probe::ALL.len());
    for probe in Probe::ALL {
        let reply = backend.complete(probe.prompt()).await?;
        let score = probe.score(&reply);
        debug!(probe = ?probe, score, "Probe scored");
        if let Some(dir) = transcripts {
            let transcript = format!(
                "# {}\n\n## Prompt\n\n{}\n\n## Reply\n\n{}\n\n## Score\n\n{score:.2}\n",
                probe.file_name(),
                probe.prompt(),
                reply.trim_end()
            );
            fs::write(dir.join(probe.file_name()), transcript)?;
        }
        scores.push((probe, score));
    }
    let record = CapabilityRecord::from_scores(scores);
    info!(
        backend = backend.name(),
        model = backend.model(),
        brilliance = record.brilliance,
        mode = %record.candidate_mode(),
        "Profiled backend"
    );
    Ok(record)
}
