//! Word-window truncation for over-budget prompts

use std::borrow::Cow;

/// Marker placed between kept windows
pub const ELISION_MARKER: &str = "\n\n[...]\n\n";

/// Word counts kept from the head, middle and tail of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationWindows {
    pub head: usize,
    pub middle: usize,
    pub tail: usize,
}

impl Default for TruncationWindows {
    fn default() -> Self {
        Self {
            head: 400,
            middle: 200,
            tail: 200,
        }
    }
}

impl TruncationWindows {
    pub fn total(&self) -> usize {
        self.head + self.middle + self.tail
    }

    /// Keep head, middle and tail word windows and drop the rest
    ///
    /// Messages with no more than `total()` words come back unchanged. The
    /// middle window is centred on the message and never overlaps the other
    /// two. Longer messages always come back strictly shorter: when the
    /// markers would outweigh the dropped words, the middle window shrinks
    /// first, then the head and tail.
    pub fn apply<'a>(&self, message: &'a str) -> Cow<'a, str> {
        let words: Vec<&str> = message.split_whitespace().collect();
        let len = words.len();
        if len <= self.total() {
            return Cow::Borrowed(message);
        }

        let (mut head, mut middle, mut tail) = (self.head, self.middle, self.tail);
        loop {
            let out = Self::join_windows(&words, head, middle, tail);
            if out.len() < message.len() || head + middle + tail == 0 {
                return Cow::Owned(out);
            }
            if middle > 0 {
                middle -= 1;
            } else if head >= tail && head > 0 {
                head -= 1;
            } else {
                tail -= 1;
            }
        }
    }

    fn join_windows(words: &[&str], head: usize, middle: usize, tail: usize) -> String {
        let len = words.len();
        let middle_start = (len / 2)
            .saturating_sub(middle / 2)
            .clamp(head, len - tail - middle);

        let head_text = words[..head].join(" ");
        let tail_text = words[len - tail..].join(" ");
        if middle == 0 {
            return format!("{}{}{}", head_text, ELISION_MARKER, tail_text);
        }

        let middle_text = words[middle_start..middle_start + middle].join(" ");
        format!(
            "{}{}{}{}{}",
            head_text, ELISION_MARKER, middle_text, ELISION_MARKER, tail_text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_short_message_unchanged() {
        let windows = TruncationWindows::default();
        let message = numbered(800);
        assert!(matches!(windows.apply(&message), Cow::Borrowed(_)));
    }

    #[test]
    fn test_long_message_keeps_three_windows() {
        let windows = TruncationWindows::default();
        let message = numbered(2000);
        let truncated = windows.apply(&message);

        let parts: Vec<&str> = truncated.split(ELISION_MARKER).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].split_whitespace().count(), 400);
        assert_eq!(parts[1].split_whitespace().count(), 200);
        assert_eq!(parts[2].split_whitespace().count(), 200);

        assert!(parts[0].starts_with("w0 "));
        assert!(parts[1].starts_with("w900 "));
        assert!(parts[2].ends_with("w1999"));
        assert!(truncated.len() < message.len());
    }

    #[test]
    fn test_middle_window_does_not_overlap_head() {
        let windows = TruncationWindows::default();
        let message = numbered(1000);
        let truncated = windows.apply(&message);
        let parts: Vec<&str> = truncated.split(ELISION_MARKER).collect();

        assert!(parts[1].starts_with("w400 "));
        assert!(parts[2].starts_with("w800 "));
        let kept: usize = parts.iter().map(|p| p.split_whitespace().count()).sum();
        assert_eq!(kept, 800);
        assert!(truncated.len() < message.len());
    }

    #[test]
    fn test_just_over_window_total_still_shrinks() {
        let windows = TruncationWindows::default();
        for n in [801, 802, 805, 810] {
            let message = numbered(n);
            let truncated = windows.apply(&message);
            assert!(
                truncated.len() < message.len(),
                "{} words: {} >= {}",
                n,
                truncated.len(),
                message.len()
            );

            let parts: Vec<&str> = truncated.split(ELISION_MARKER).collect();
            assert!(parts[0].starts_with("w0 "));
            assert!(parts.last().unwrap().ends_with(&format!("w{}", n - 1)));
        }
    }

    #[test]
    fn test_tiny_windows_shrink_below_marker_overhead() {
        let windows = TruncationWindows {
            head: 1,
            middle: 1,
            tail: 1,
        };
        let message = "alpha beta gamma delta epsilon";
        let truncated = windows.apply(message);
        assert_eq!(truncated, format!("alpha{}epsilon", ELISION_MARKER));
        assert!(truncated.len() < message.len());
    }

    #[test]
    fn test_zero_middle_window() {
        let windows = TruncationWindows {
            head: 2,
            middle: 0,
            tail: 2,
        };
        let truncated = windows.apply("a b c d e f");
        assert_eq!(truncated, format!("a b{}e f", ELISION_MARKER));
    }
}
