//! Concat manifest and normalization filter graph.

use std::path::Path;

/// Audio sample rate every clip is resampled to.
pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;

/// Forward slashes only, no doubled separators.
pub fn normalize_manifest_path(path: &Path) -> String {
    let mut normalized = path.to_string_lossy().replace('\\', "/");
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    normalized
}

/// Concat-demuxer manifest: one `file '<path>'` line per clip.
pub fn concat_manifest<P: AsRef<Path>>(clips: &[P]) -> String {
    clips
        .iter()
        .map(|clip| {
            let path = normalize_manifest_path(clip.as_ref()).replace('\'', r"'\''");
            format!("file '{path}'\n")
        })
        .collect()
}

/// Filter graph that fits every input into `width`x`height`, restarts its
/// timestamps at zero and concatenates the results into `[outv][outa]`.
pub fn normalize_concat_graph(inputs: usize, width: u32, height: u32) -> String {
    let mut chains: Vec<String> = Vec::with_capacity(inputs * 2 + 1);
    for i in 0..inputs {
        chains.push(format!(
            "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,\
             setsar=1,setpts=PTS-STARTPTS[v{i}]"
        ));
    }
    for i in 0..inputs {
        chains.push(format!(
            "[{i}:a]aresample={OUTPUT_SAMPLE_RATE}:async=1:min_comp=0.001:first_pts=0,\
             asetpts=PTS-STARTPTS[a{i}]"
        ));
    }
    let pairs: String = (0..inputs).map(|i| format!("[v{i}][a{i}]")).collect();
    chains.push(format!("{pairs}concat=n={inputs}:v=1:a=1[outv][outa]"));
    chains.join(";")
}
