// References:
// 1. https://github.com/clitic/vsd/blob/30ca1985e4a467ea3304b11c08d3176deaafd22a/vsd/src/dash/template.rs
// 2. https://github.com/emarsden/dash-mpd-rs/blob/6ebdfb4759adbda8233b5b3520804e23ff86e7de/src/fetch.rs#L435-L466

use regex::{Regex, Replacer};
use std::{collections::HashMap, sync::LazyLock};

// Only %0[width]d is permitted as a format tag (DASH-IF IOP v4.3), and `$$` stands for a literal `$`.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(RepresentationID|Number|Time|Bandwidth)(?:%0(\d+)d)?)?\$").unwrap()
});

pub struct Template<'a> {
    args: HashMap<&'a str, String>,
}

impl Template<'_> {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(4),
        }
    }

    pub fn insert(&mut self, key: &'static str, value: String) {
        self.args.insert(key, value);
    }

    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, TemplateReplacer(&self.args))
            .to_string()
    }
}

impl Default for Template<'_> {
    fn default() -> Self {
        Self::new()
    }
}

struct TemplateReplacer<'a>(&'a HashMap<&'a str, String>);

impl Replacer for TemplateReplacer<'_> {
    fn replace_append(&mut self, caps: &regex::Captures<'_>, dst: &mut String) {
        let Some(key) = caps.get(1).map(|m| m.as_str()) else {
            dst.push('$');
            return;
        };
        let Some(value) = self.0.get(key) else {
            dst.push_str(&caps[0]);
            return;
        };

        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(width) => dst.push_str(&format!("{value:0>width$}")),
            None => dst.push_str(value),
        }
    }
}
