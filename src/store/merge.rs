//! Three-way merge and conflict-marker parsing (§4.C).
use crate::error::Result;

pub const CONFLICT_START: &str = "<<<<<<<";
pub const CONFLICT_SEP: &str = "=======";
pub const CONFLICT_END: &str = ">>>>>>>";

pub struct MergeOutcome {
	pub content: String,
	pub has_conflicts: bool,
}

/// Compute the three-way merge of `(base, store, target)` per the standard algorithm.
pub fn three_way_merge(base: &str, store: &str, target: &str) -> MergeOutcome {
	match diffy::merge(base, store, target) {
		Ok(content) => MergeOutcome { content, has_conflicts: false },
		Err(content) => MergeOutcome { content, has_conflicts: true },
	}
}

/// Does this content contain a well-formed conflict-marker block
/// (`^<{7}`, `^={7}`, `^>{7}` lines, in that order, in the same document)?
pub fn contains_conflict_markers(content: &str) -> bool {
	let mut seen_start = false;
	let mut seen_sep = false;
	for line in content.lines() {
		if line.starts_with(CONFLICT_START) {
			seen_start = true;
		} else if seen_start && line.starts_with(CONFLICT_SEP) {
			seen_sep = true;
		} else if seen_sep && line.starts_with(CONFLICT_END) {
			return true;
		}
	}
	false
}

/// Extract the "ours" and "theirs" sides from a string that may contain
/// conflict markers. Lines outside conflict blocks belong to both sides.
pub fn parse_conflict_markers(content: &str) -> (String, String) {
	let mut ours = String::new();
	let mut theirs = String::new();

	enum State {
		Outside,
		Ours,
		Theirs,
	}
	let mut state = State::Outside;

	for line in content.split_inclusive('\n') {
		let trimmed = line.trim_end_matches('\n');
		if trimmed.starts_with(CONFLICT_START) {
			state = State::Ours;
			continue;
		}
		if matches!(state, State::Ours) && trimmed.starts_with(CONFLICT_SEP) {
			state = State::Theirs;
			continue;
		}
		if matches!(state, State::Theirs) && trimmed.starts_with(CONFLICT_END) {
			state = State::Outside;
			continue;
		}
		match state {
			State::Outside => {
				ours.push_str(line);
				theirs.push_str(line);
			}
			State::Ours => ours.push_str(line),
			State::Theirs => theirs.push_str(line),
		}
	}

	(ours, theirs)
}

/// Parse conflict markers in bytes assumed to be UTF-8 text; non-UTF-8 content
/// has no markers to speak of and is returned unchanged on both sides.
pub fn parse_conflict_markers_bytes(content: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
	match std::str::from_utf8(content) {
		Ok(text) => {
			let (ours, theirs) = parse_conflict_markers(text);
			Ok((ours.into_bytes(), theirs.into_bytes()))
		}
		Err(_) => Ok((content.to_vec(), content.to_vec())),
	}
}


// vim: ts=4
