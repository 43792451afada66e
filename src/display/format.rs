//! Per-sensor text formatting for the display.
//!
//! A sensor either has a template with named placeholders bound to its
//! reading's fields, e.g. `"{temp:.1f}C {rel:.0f}%"`, or falls back to fixed
//! unit suffixes. Placeholder specs follow the familiar
//! `[[fill]align][sign][0][width][.precision][type]` mini-language with types
//! `f`, `F`, `e`, `E`, `%`, or none for the shortest round-trip form.

use crate::domain::SensorReading;
use crate::error::{ConfigError, DisplayError};

/// How one sensor is rendered on the display.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorFormat {
    Template(Template),
    Units,
}

impl SensorFormat {
    pub fn render(&self, reading: &SensorReading) -> Result<String, DisplayError> {
        match self {
            SensorFormat::Template(template) => template.render(reading),
            SensorFormat::Units => Ok(format_with_units(reading)),
        }
    }
}

pub fn unit_suffix(field: &str) -> &'static str {
    match field {
        "temp" => "C",
        "rel" => "%rel",
        _ => "",
    }
}

/// Every field right-aligned to 5 columns with one decimal, plus its unit.
pub fn format_with_units(reading: &SensorReading) -> String {
    reading
        .fields()
        .map(|(name, value)| format!("{value:>5.1}{}", unit_suffix(name)))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field { name: String, spec: Spec },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
    /// padding goes between the sign and the digits
    AfterSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Sign {
    #[default]
    Negative,
    Always,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Kind {
    #[default]
    Shortest,
    Fixed,
    Exponent { upper: bool },
    Percent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Spec {
    fill: char,
    align: Option<Align>,
    sign: Sign,
    width: usize,
    precision: Option<usize>,
    kind: Kind,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: Sign::default(),
            width: 0,
            precision: None,
            kind: Kind::default(),
        }
    }
}

impl Template {
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let fail = |reason: &str| ConfigError::Template {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(fail("single '}' is not allowed")),
                '{' => {
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(fail("nested '{' in placeholder")),
                            Some(c) => body.push(c),
                            None => return Err(fail("unterminated placeholder")),
                        }
                    }
                    let (name, spec) = body.split_once(':').unwrap_or((body.as_str(), ""));
                    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                        return Err(fail(&format!("placeholder '{{{body}}}' needs a field name")));
                    }
                    if name.chars().all(|c| c.is_ascii_digit()) {
                        return Err(fail("positional placeholders are not supported"));
                    }
                    let spec = parse_spec(spec).map_err(|reason| fail(&reason))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field {
                        name: name.to_string(),
                        spec,
                    });
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    pub fn render(&self, reading: &SensorReading) -> Result<String, DisplayError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { name, spec } => {
                    let value = reading
                        .get(name)
                        .ok_or_else(|| DisplayError::MissingField(name.clone()))?;
                    out.push_str(&spec.apply(value));
                }
            }
        }
        Ok(out)
    }
}

fn parse_spec(spec: &str) -> Result<Spec, String> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;

    let align_of = |c: char| match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    };
    if let Some(align) = chars.get(1).copied().and_then(align_of) {
        out.fill = chars[0];
        out.align = Some(align);
        i = 2;
    } else if let Some(align) = chars.first().copied().and_then(align_of) {
        out.align = Some(align);
        i = 1;
    }

    match chars.get(i) {
        Some('+') => {
            out.sign = Sign::Always;
            i += 1;
        }
        Some('-') => i += 1,
        Some(' ') => {
            out.sign = Sign::Space;
            i += 1;
        }
        _ => {}
    }

    if chars.get(i) == Some(&'0') {
        if out.align.is_none() {
            out.fill = '0';
            out.align = Some(Align::AfterSign);
        }
        i += 1;
    }

    let digits = |i: &mut usize| {
        let start = *i;
        while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>()
    };

    let width = digits(&mut i);
    if !width.is_empty() {
        out.width = width.parse().map_err(|_| format!("width '{width}' is too large"))?;
    }

    if chars.get(i) == Some(&'.') {
        i += 1;
        let precision = digits(&mut i);
        if precision.is_empty() {
            return Err("'.' must be followed by a precision".to_string());
        }
        out.precision = Some(precision.parse().map_err(|_| format!("precision '{precision}' is too large"))?);
    }

    if let Some(&c) = chars.get(i) {
        out.kind = match c {
            'f' | 'F' => Kind::Fixed,
            'e' => Kind::Exponent { upper: false },
            'E' => Kind::Exponent { upper: true },
            '%' => Kind::Percent,
            other => return Err(format!("unsupported format type '{other}'")),
        };
        i += 1;
    }

    if i != chars.len() {
        return Err(format!("unexpected '{}' in format spec", chars[i..].iter().collect::<String>()));
    }
    if out.kind == Kind::Shortest && out.precision.is_some() {
        return Err("a precision needs a type of f, e or %".to_string());
    }
    Ok(out)
}

impl Spec {
    fn apply(&self, value: f64) -> String {
        let negative = value.is_sign_negative() && !value.is_nan();
        let magnitude = value.abs();
        let body = match self.kind {
            Kind::Shortest => shortest(magnitude),
            Kind::Fixed => fixed(magnitude, self.precision.unwrap_or(6)),
            Kind::Exponent { upper } => exponent(magnitude, self.precision.unwrap_or(6), upper),
            Kind::Percent => format!("{}%", fixed(magnitude * 100.0, self.precision.unwrap_or(6))),
        };
        let sign = match (negative, self.sign) {
            (true, _) => "-",
            (false, Sign::Always) => "+",
            (false, Sign::Space) => " ",
            (false, Sign::Negative) => "",
        };

        let len = sign.chars().count() + body.chars().count();
        let pad = self.width.saturating_sub(len);
        let fill = |n: usize| std::iter::repeat(self.fill).take(n).collect::<String>();
        match self.align.unwrap_or(Align::Right) {
            Align::Left => format!("{sign}{body}{}", fill(pad)),
            Align::Right => format!("{}{sign}{body}", fill(pad)),
            Align::Center => format!("{}{sign}{body}{}", fill(pad / 2), fill(pad - pad / 2)),
            Align::AfterSign => format!("{sign}{}{body}", fill(pad)),
        }
    }
}

fn fixed(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return "inf".to_string();
    }
    format!("{value:.precision$}")
}

/// shortest round-trip form, always with a decimal point (`45.0`, `21.567`)
fn shortest(value: f64) -> String {
    if !value.is_finite() {
        return fixed(value, 0);
    }
    let text = value.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// `d.ddde+XX` with at least two exponent digits
fn exponent(value: f64, precision: usize, upper: bool) -> String {
    if !value.is_finite() {
        let text = fixed(value, 0);
        return if upper { text.to_uppercase() } else { text };
    }
    let text = format!("{value:.precision$e}");
    let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let marker = if upper { 'E' } else { 'e' };
    let exp_sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{marker}{exp_sign}{:02}", exp.abs())
}
