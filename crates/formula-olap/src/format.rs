//! Number formatting for `Format(value, pattern)`.
//!
//! Patterns are parsed once into a [`Formatter`]. Supported: digit placeholders `0` and `#`,
//! grouping `,`, decimal point `.`, `%` (scales by 100), quoted or backslash-escaped literal
//! text, up to three `;`-separated sections (positive; negative; zero), and the named formats
//! `Standard`, `Fixed`, `Percent`, `Currency` and `General Number`.

use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct Formatter {
    positive: Section,
    negative: Option<Section>,
    zero: Option<Section>,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Section {
    general: bool,
    prefix: String,
    suffix: String,
    min_int: usize,
    min_frac: usize,
    max_frac: usize,
    grouping: bool,
    percent: bool,
}

impl Formatter {
    pub fn new(pattern: &str) -> Self {
        let expanded = match pattern.trim().to_ascii_lowercase().as_str() {
            "" | "general number" | "general" => {
                return Self {
                    positive: Section {
                        general: true,
                        ..Section::default()
                    },
                    negative: None,
                    zero: None,
                }
            }
            "standard" => "#,##0.00",
            "fixed" => "0.00",
            "percent" => "0.00%",
            "currency" => "$#,##0.00",
            _ => pattern,
        };

        let mut sections = split_sections(expanded).into_iter().map(|s| parse_section(&s));
        let positive = sections.next().unwrap_or_default();
        let negative = sections.next();
        let zero = sections.next();
        Self {
            positive,
            negative,
            zero,
        }
    }

    pub fn format(&self, value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::Integer(i) => self.format_number(*i as f64),
            Value::Float(n) => self.format_number(*n),
            other => other.to_string(),
        }
    }

    pub fn format_number(&self, n: f64) -> String {
        if n == 0.0 {
            if let Some(zero) = &self.zero {
                return zero.render(0.0);
            }
        }
        if n < 0.0 {
            return match &self.negative {
                Some(negative) => negative.render(-n),
                None => {
                    let body = self.positive.render(-n);
                    if body.chars().any(|c| c.is_ascii_digit() && c != '0') {
                        format!("-{body}")
                    } else {
                        body
                    }
                }
            };
        }
        self.positive.render(n)
    }
}

fn split_sections(pattern: &str) -> Vec<String> {
    let mut sections = vec![String::new()];
    let mut in_quote = false;
    let mut escaped = false;
    for ch in pattern.chars() {
        let current = sections.last_mut().map(|s| {
            s.push(ch);
            s
        });
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            ';' if !in_quote => {
                if let Some(current) = current {
                    current.pop();
                }
                sections.push(String::new());
            }
            _ => {}
        }
    }
    sections
}

fn parse_section(pattern: &str) -> Section {
    let mut section = Section::default();
    let mut seen_digit = false;
    let mut after_point = false;
    let mut chars = pattern.chars();

    let mut push_literal = |section: &mut Section, seen_digit: bool, text: &str| {
        if seen_digit {
            section.suffix.push_str(text);
        } else {
            section.prefix.push_str(text);
        }
    };

    while let Some(ch) = chars.next() {
        match ch {
            '0' | '#' => {
                seen_digit = true;
                if after_point {
                    section.max_frac += 1;
                    if ch == '0' {
                        section.min_frac = section.max_frac;
                    }
                } else if ch == '0' {
                    section.min_int += 1;
                }
            }
            '.' => {
                seen_digit = true;
                after_point = true;
            }
            ',' if !after_point => section.grouping = true,
            '%' => {
                section.percent = true;
                push_literal(&mut section, seen_digit, "%");
            }
            '"' => {
                let text: String = chars.by_ref().take_while(|c| *c != '"').collect();
                push_literal(&mut section, seen_digit, &text);
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    push_literal(&mut section, seen_digit, next.encode_utf8(&mut [0; 4]));
                }
            }
            other => push_literal(&mut section, seen_digit, other.encode_utf8(&mut [0; 4])),
        }
    }
    if !seen_digit {
        section.general = section.prefix.is_empty();
    }
    section
}

impl Section {
    fn render(&self, n: f64) -> String {
        if self.general {
            return format!("{}{}{}", self.prefix, Value::Float(n), self.suffix);
        }
        let scaled = if self.percent { n * 100.0 } else { n };
        let fixed = format!("{:.*}", self.max_frac, scaled);
        let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));

        let mut frac = frac_part.to_string();
        while frac.len() > self.min_frac && frac.ends_with('0') {
            frac.pop();
        }

        let mut int = int_part.trim_start_matches('0').to_string();
        while int.len() < self.min_int {
            int.insert(0, '0');
        }
        if self.grouping {
            int = group_thousands(&int);
        }

        let mut out = String::with_capacity(self.prefix.len() + int.len() + frac.len() + 8);
        out.push_str(&self.prefix);
        out.push_str(&int);
        if !frac.is_empty() {
            out.push('.');
            out.push_str(&frac);
        }
        out.push_str(&self.suffix);
        out
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let len = digits.len();
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (len - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn grouping_and_fixed_decimals() {
        let f = Formatter::new("#,##0.00");
        assert_eq!(f.format_number(1234.5), "1,234.50");
        assert_eq!(f.format_number(0.0), "0.00");
        assert_eq!(f.format_number(1234567.0), "1,234,567.00");
    }

    #[test]
    fn optional_decimals_are_trimmed() {
        let f = Formatter::new("0.##");
        assert_eq!(f.format_number(2.5), "2.5");
        assert_eq!(f.format_number(3.0), "3");
    }

    #[test]
    fn named_formats() {
        assert_eq!(Formatter::new("Percent").format_number(0.25), "25.00%");
        assert_eq!(Formatter::new("Currency").format_number(-1234.5), "-$1,234.50");
        assert_eq!(Formatter::new("Standard").format(&Value::Integer(42)), "42.00");
        assert_eq!(Formatter::new("General Number").format_number(4.0), "4");
    }

    #[test]
    fn negative_and_zero_sections() {
        let f = Formatter::new("0.0;(0.0);\"nil\"");
        assert_eq!(f.format_number(1.5), "1.5");
        assert_eq!(f.format_number(-1.5), "(1.5)");
        assert_eq!(f.format_number(0.0), "nil");
    }

    #[test]
    fn null_formats_as_empty() {
        assert_eq!(Formatter::new("0.00").format(&Value::Null), "");
    }
}
