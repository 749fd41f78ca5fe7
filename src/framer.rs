//! Output framing for captured shell transcripts.
//!
//! The shell gives no message boundaries, so a batch's output is cut out of
//! the raw transcript by locating the echo of the first command and dropping
//! the bare prompt the device prints when it is done.

use log::debug;

/// Erase artifact some terminals emit when correcting echoed input.
const BACKSPACE_ERASE: &str = " \u{8}";

/// Returns the portion of `transcript` attributable to `command`.
///
/// Lines before the command echo are discarded. The text preceding the command
/// on the echo line is taken as the prompt, and later lines consisting only of
/// that prompt are dropped. If the command never appears, the transcript is
/// returned unchanged.
pub fn frame_output(transcript: &str, command: &str) -> String {
    let mut framed = String::with_capacity(transcript.len());
    let mut prompt: Option<String> = None;

    for raw_line in transcript.split('\n') {
        let line = raw_line.replace(BACKSPACE_ERASE, "");

        match prompt.as_deref() {
            Some(prompt) => {
                if prompt.is_empty() || !line.replace(prompt, "").is_empty() {
                    framed.push_str(&line);
                    framed.push('\n');
                }
            }
            None => {
                if let Some(pos) = line.find(command) {
                    let found = line[..pos].replace('\r', "").trim().to_string();
                    debug!("Found prompt '{}' before command echo", found);
                    prompt = Some(found);
                    framed.push_str(&line);
                    framed.push('\n');
                }
            }
        }
    }

    if prompt.is_none() {
        return transcript.to_string();
    }
    framed
}
