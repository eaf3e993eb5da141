/// Incremental marker detection over a live byte stream.
///
/// Markers are literal strings searched in raw bytes, so output that is not
/// valid UTF-8 (or a multi-byte character split across reads) never breaks
/// detection. Only a bounded tail of the stream is kept between reads.
use regex::bytes::Regex;

/// Errors produced when building a scanner.
#[derive(Debug)]
pub enum ScanError {
    /// No markers were supplied.
    NoMarkers,
    /// The marker at this index is the empty string.
    EmptyMarker { index: usize },
    /// The combined pattern could not be compiled.
    Pattern(regex::Error),
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::NoMarkers => write!(f, "no markers configured"),
            ScanError::EmptyMarker { index } => write!(f, "marker {index} is empty"),
            ScanError::Pattern(e) => write!(f, "invalid marker pattern: {e}"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Pattern(e) => Some(e),
            _ => None,
        }
    }
}

/// Finds the first occurrence of any of an ordered list of markers.
///
/// "First" means earliest start position in the stream. When two markers
/// would start at the same position the one listed first wins, which is the
/// leftmost-first semantics of a regex alternation.
pub struct MarkerScanner {
    pattern: Regex,
    marker_count: usize,
    /// Unmatched tail of the stream, never longer than `keep` after a feed.
    window: Vec<u8>,
    keep: usize,
}

impl MarkerScanner {
    pub fn new<S: AsRef<str>>(markers: &[S]) -> Result<Self, ScanError> {
        if markers.is_empty() {
            return Err(ScanError::NoMarkers);
        }
        if let Some(index) = markers.iter().position(|m| m.as_ref().is_empty()) {
            return Err(ScanError::EmptyMarker { index });
        }

        let alternation = markers
            .iter()
            .map(|m| format!("({})", regex::escape(m.as_ref())))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&alternation).map_err(ScanError::Pattern)?;

        let longest = markers.iter().map(|m| m.as_ref().len()).max().unwrap_or(1);

        Ok(Self {
            pattern,
            marker_count: markers.len(),
            window: Vec::with_capacity(longest * 2),
            keep: longest - 1,
        })
    }

    /// Append a chunk of output and report the index of the marker that
    /// appears first, if any has now been seen.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        self.window.extend_from_slice(chunk);

        if let Some(caps) = self.pattern.captures(&self.window) {
            let index = (1..=self.marker_count).find(|&group| caps.get(group).is_some());
            tracing::debug!(?index, "marker matched");
            // The outer match guarantees one group participated.
            return index.map(|group| group - 1);
        }

        // Anything older than `keep` bytes cannot be the start of a marker
        // that completes in a later chunk.
        if self.window.len() > self.keep {
            let excess = self.window.len() - self.keep;
            self.window.drain(..excess);
        }
        None
    }

    /// Bytes currently retained from earlier chunks.
    #[cfg(test)]
    fn retained(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKERS: [&str; 2] = ["All is well in the universe", "halting..."];

    #[test]
    fn test_success_marker_in_single_chunk() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        assert_eq!(
            scanner.feed(b"Test suite passed\nAll is well in the universe\n"),
            Some(0)
        );
    }

    #[test]
    fn test_failure_marker_in_single_chunk() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        assert_eq!(scanner.feed(b"assertion failed, halting...\r\n"), Some(1));
    }

    #[test]
    fn test_no_marker() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        assert_eq!(scanner.feed(b"booting kernel\n"), None);
        assert_eq!(scanner.feed(b"running tests\n"), None);
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        assert_eq!(scanner.feed(b"...done\nAll is we"), None);
        assert_eq!(scanner.feed(b"ll in the uni"), None);
        assert_eq!(scanner.feed(b"verse\n"), Some(0));
    }

    #[test]
    fn test_marker_split_one_byte_at_a_time() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        let input = b"noise halting...";
        let mut found = None;
        for byte in input.iter() {
            if let Some(ix) = scanner.feed(std::slice::from_ref(byte)) {
                found = Some(ix);
                break;
            }
        }
        assert_eq!(found, Some(1));
    }

    #[test]
    fn test_earliest_occurrence_wins() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        assert_eq!(
            scanner.feed(b"halting... then All is well in the universe"),
            Some(1)
        );

        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        assert_eq!(
            scanner.feed(b"All is well in the universe then halting..."),
            Some(0)
        );
    }

    #[test]
    fn test_same_position_prefers_earlier_marker() {
        let mut scanner = MarkerScanner::new(&["abc", "abcdef"]).unwrap();
        assert_eq!(scanner.feed(b"xxabcdef"), Some(0));

        let mut scanner = MarkerScanner::new(&["abcdef", "abc"]).unwrap();
        assert_eq!(scanner.feed(b"xxabcdef"), Some(0));
    }

    #[test]
    fn test_dots_are_literal() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        assert_eq!(scanner.feed(b"haltingXYZ"), None);
    }

    #[test]
    fn test_window_stays_bounded() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        let noise = vec![b'x'; 64 * 1024];
        for _ in 0..8 {
            assert_eq!(scanner.feed(&noise), None);
        }
        assert_eq!(scanner.retained(), MARKERS[0].len() - 1);
    }

    #[test]
    fn test_invalid_utf8_is_tolerated() {
        let mut scanner = MarkerScanner::new(&MARKERS).unwrap();
        assert_eq!(scanner.feed(&[0xff, 0xfe, 0x80]), None);
        assert_eq!(scanner.feed(b"halting..."), Some(1));
    }

    #[test]
    fn test_rejects_empty_marker_list() {
        let markers: [&str; 0] = [];
        assert!(matches!(
            MarkerScanner::new(&markers),
            Err(ScanError::NoMarkers)
        ));
    }

    #[test]
    fn test_rejects_empty_marker() {
        let err = MarkerScanner::new(&["ok", ""]).err().unwrap();
        assert!(matches!(err, ScanError::EmptyMarker { index: 1 }));
        assert_eq!(err.to_string(), "marker 1 is empty");
    }
}
