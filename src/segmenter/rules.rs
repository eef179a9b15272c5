//! Suppression rules for sentence boundary candidates.
//!
//! Each rule inspects one candidate terminator and says whether it must not
//! be treated as a sentence end. Rules run in table order and the first
//! match wins; the segmenter only emits when no rule fires.

/// Characters that end a sentence.
pub const TERMINATORS: &[char] = &['.', '!', '?'];

/// Characters that may directly follow a terminator and still belong to the
/// sentence (`He said "stop."`).
pub const CLOSERS: &[char] = &['"', '\'', ')', ']'];

/// Words that end in a dot without ending a sentence.
pub const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "i.e", "e.g", "etc", "vs", "inc", "ltd", "corp",
    "st", "ave", "blvd", "dept", "fig", "vol", "no",
];

/// A potential sentence end inside the segmenter buffer.
///
/// `run_start..run_end` covers the terminator run (`?!`, `...`);
/// `end` additionally covers trailing closers. All are byte offsets.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub buffer: &'a str,
    pub run_start: usize,
    pub run_end: usize,
    pub end: usize,
}

impl<'a> Candidate<'a> {
    /// Text up to and including the terminator run and closers.
    pub fn prefix(&self) -> &'a str {
        &self.buffer[..self.end]
    }

    pub fn terminators(&self) -> &'a str {
        &self.buffer[self.run_start..self.run_end]
    }

    /// The terminator run is the last thing in the buffer.
    pub fn run_at_end(&self) -> bool {
        self.run_end == self.buffer.len()
    }

    /// The whitespace-delimited word directly before the terminator run.
    pub fn word_before(&self) -> &'a str {
        let head = &self.buffer[..self.run_start];
        let start = head
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        &head[start..]
    }

    fn char_before_run(&self) -> Option<char> {
        self.buffer[..self.run_start].chars().next_back()
    }
}

/// A named suppression predicate.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub suppresses: fn(&Candidate<'_>) -> bool,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

/// Evaluation order matters only for reporting which rule fired.
pub const RULES: &[Rule] = &[
    Rule {
        name: "open_quote",
        suppresses: inside_open_quote,
    },
    Rule {
        name: "decimal",
        suppresses: trailing_decimal,
    },
    Rule {
        name: "url",
        suppresses: trailing_url,
    },
    Rule {
        name: "ellipsis",
        suppresses: trailing_dots,
    },
    Rule {
        name: "abbreviation",
        suppresses: abbreviation,
    },
];

/// The first rule that suppresses this candidate, if any.
pub fn suppressing_rule(candidate: &Candidate<'_>) -> Option<&'static Rule> {
    RULES.iter().find(|rule| (rule.suppresses)(candidate))
}

/// An odd number of double quotes, or of single quotes, precedes the end of
/// the candidate. A single quote between two letters or digits is an
/// apostrophe and is not counted.
pub fn inside_open_quote(candidate: &Candidate<'_>) -> bool {
    let prefix = candidate.prefix();
    let chars: Vec<char> = prefix.chars().collect();
    let mut double = 0usize;
    let mut single = 0usize;
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '"' => double += 1,
            '\'' => {
                let before = i.checked_sub(1).and_then(|j| chars.get(j));
                let after = chars.get(i + 1);
                let apostrophe = before.is_some_and(|b| b.is_alphanumeric())
                    && after.is_some_and(|a| a.is_alphanumeric());
                if !apostrophe {
                    single += 1;
                }
            }
            _ => {}
        }
    }
    double % 2 == 1 || single % 2 == 1
}

/// A dot directly after a digit at the end of the buffer may still grow
/// into a decimal number.
pub fn trailing_decimal(candidate: &Candidate<'_>) -> bool {
    candidate.run_at_end()
        && candidate.terminators().starts_with('.')
        && candidate.char_before_run().is_some_and(|c| c.is_ascii_digit())
}

/// A terminator dangling at the end of a URL-like word may still be part of
/// the address.
pub fn trailing_url(candidate: &Candidate<'_>) -> bool {
    if !candidate.run_at_end() {
        return false;
    }
    let word = candidate
        .word_before()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_lowercase();
    word.starts_with("www.") || word.starts_with("http://") || word.starts_with("https://")
}

/// A run of dots at the end of the buffer. One or two may still become an
/// ellipsis, and a finished ellipsis often continues in lowercase, so both
/// wait for the next token.
pub fn trailing_dots(candidate: &Candidate<'_>) -> bool {
    candidate.run_at_end() && candidate.terminators().chars().all(|c| c == '.')
}

/// A dot that closes a known abbreviation ("Dr.", "e.g.").
pub fn abbreviation(candidate: &Candidate<'_>) -> bool {
    if !candidate.terminators().starts_with('.') {
        return false;
    }
    let word = candidate
        .word_before()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    ABBREVIATIONS.contains(&word.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Candidate for the last terminator run in `buffer`.
    fn last_candidate(buffer: &str) -> Candidate<'_> {
        let run_end = buffer
            .char_indices()
            .rev()
            .find(|(_, c)| TERMINATORS.contains(c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap();
        let run_start = buffer[..run_end]
            .char_indices()
            .rev()
            .take_while(|(_, c)| TERMINATORS.contains(c))
            .last()
            .map(|(i, _)| i)
            .unwrap();
        let end = buffer[run_end..]
            .char_indices()
            .find(|(_, c)| !CLOSERS.contains(c))
            .map(|(i, _)| run_end + i)
            .unwrap_or(buffer.len());
        Candidate {
            buffer,
            run_start,
            run_end,
            end,
        }
    }

    fn fired(buffer: &str) -> Option<&'static str> {
        suppressing_rule(&last_candidate(buffer)).map(|r| r.name)
    }

    #[test]
    fn test_rule_table_order() {
        let names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec!["open_quote", "decimal", "url", "ellipsis", "abbreviation"]
        );
    }

    #[test]
    fn test_open_double_quote() {
        assert_eq!(fired("He said \"Stop."), Some("open_quote"));
        assert_eq!(fired("He said \"Stop.\""), None);
    }

    #[test]
    fn test_apostrophes_are_not_quotes() {
        assert_eq!(fired("I don't know!"), None);
        assert_eq!(fired("It's the dog's bowl!"), None);
        assert_eq!(fired("She said 'go!"), Some("open_quote"));
    }

    #[test]
    fn test_decimal_only_at_end() {
        let c = last_candidate("The value is 3.");
        assert!(trailing_decimal(&c));
        let c = last_candidate("The value is 3.14.");
        assert!(trailing_decimal(&c));
        let c = last_candidate("I counted 3. Then");
        assert!(!trailing_decimal(&c));
        let c = last_candidate("Version three.");
        assert!(!trailing_decimal(&c));
    }

    #[test]
    fn test_url_dangling_dot() {
        let c = last_candidate("Visit www.example.com.");
        assert!(trailing_url(&c));
        let c = last_candidate("See HTTPS://Example.org?");
        assert!(trailing_url(&c));
        let c = last_candidate("Visit www.example.com. Done");
        assert!(!trailing_url(&c));
        let c = last_candidate("Visit the site.");
        assert!(!trailing_url(&c));
    }

    #[test]
    fn test_trailing_dots() {
        assert!(trailing_dots(&last_candidate("Wait.")));
        assert!(trailing_dots(&last_candidate("Wait..")));
        assert!(trailing_dots(&last_candidate("Wait...")));
        assert!(!trailing_dots(&last_candidate("Wait!")));
        assert!(!trailing_dots(&last_candidate("Wait?.")));
        assert!(!trailing_dots(&last_candidate("Wait.. then")));
        assert!(!trailing_dots(&last_candidate("He said \"Go.\"")));
    }

    #[test]
    fn test_abbreviations() {
        assert_eq!(fired("Dr. Smith"), Some("abbreviation"));
        assert_eq!(fired("Ask (Prof. X"), Some("abbreviation"));
        assert_eq!(fired("Fruit, e.g. Apples"), Some("abbreviation"));
        assert_eq!(fired("Apples vs. Oranges"), Some("abbreviation"));
        assert_eq!(fired("The doctor arrived. Then"), None);
        assert_eq!(fired("Is it Dr? Yes"), None);
    }

    #[test]
    fn test_word_before_handles_start_of_buffer() {
        let c = last_candidate("Mr. Jones");
        assert_eq!(c.word_before(), "Mr");
    }

    #[test]
    fn test_closers_included_in_prefix() {
        let c = last_candidate("He said \"Go!\" Then");
        assert_eq!(c.terminators(), "!");
        assert_eq!(c.prefix(), "He said \"Go!\"");
    }
}
