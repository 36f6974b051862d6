//! # 输入校验
//!
//! [`ValidationValue`] 保存一个待校验的字符串和一组规则；[`FormValidator`] 汇总多个字段，
//! 并按固定的文案格式化失败信息。同名规则只保留最后一次设置的参数。

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::exception::Exception;

lazy_static! {
    static ref IS_INT: Regex = Regex::new(r"^[0-9]+$").unwrap();
    static ref CONTAINS_INT: Regex = Regex::new(r"[0-9]").unwrap();
    static ref IS_ALPHA: Regex = Regex::new(r"^[a-zA-Z]+$").unwrap();
    static ref CONTAINS_ALPHA: Regex = Regex::new(r"[a-zA-Z]").unwrap();
    static ref IS_ALPHANUM: Regex = Regex::new(r"^[a-zA-Z0-9]+$").unwrap();
    static ref IS_ALPHANUM_EXTRA: Regex = Regex::new(r"^[a-zA-Z0-9_.\-]+$").unwrap();
    static ref IS_TEXT: Regex = Regex::new(r"^[a-zA-Z0-9\s_.\-,;?!]+$").unwrap();
    static ref IS_UPPER: Regex = Regex::new(r"^[A-Z]+$").unwrap();
    static ref CONTAINS_UPPER: Regex = Regex::new(r"[A-Z]").unwrap();
    static ref CONTAINS_SPECIAL: Regex = Regex::new(r"[^a-zA-Z0-9\s]").unwrap();
    static ref IS_EMAIL: Regex = Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$"
    )
    .unwrap();
    static ref IS_URL: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://[^\s/?#]+[^\s]*$").unwrap();
    static ref IS_TIME: Regex = Regex::new(r"^(\d{2}):(\d{2})$").unwrap();
    static ref IS_SQL_DATE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
}

/// 默认日期格式
pub const DEFAULT_DATE_FORMAT: &str = "yyyy-mm-dd";

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    NotEmpty,
    Required,
    IsInt,
    ContainsInt,
    IsAlpha,
    ContainsAlpha,
    IsAlphanum,
    IsAlphanumExtra,
    IsText,
    IsUpper,
    ContainsUpper,
    Contains(String),
    NotContains(String),
    ContainsSpecialChar,
    MinLength(usize),
    MaxLength(usize),
    InRange(usize, usize),
    IsEmail,
    IsUrl,
    MatchesRegexp(String),
    IsTime,
    /// 参数为 `yyyy`、`mm`、`dd` 组成的格式
    IsDate(String),
    IsSqlDate,
    MustMatchPassword(String),
    NotPastPassword(String),
}

fn param<'a>(name: &str, params: &'a [&str], index: usize) -> Result<&'a str, Exception> {
    params.get(index).copied().ok_or_else(|| {
        Exception::InvalidValidationRule(format!("{} expects at least {} parameter(s)", name, index + 1))
    })
}

fn number_param(name: &str, params: &[&str], index: usize) -> Result<usize, Exception> {
    let raw = param(name, params, index)?;
    raw.trim().parse().map_err(|_| {
        Exception::InvalidValidationRule(format!("{} expects a number, got '{}'", name, raw))
    })
}

fn date_pattern(format: &str) -> String {
    format
        .replace("yyyy", "%Y")
        .replace("mm", "%m")
        .replace("dd", "%d")
}

fn strip_delimiters(pattern: &str) -> &str {
    // 兼容 `/.../flags` 形式的写法
    if let Some(body) = pattern.strip_prefix('/') {
        if let Some(end) = body.rfind('/') {
            return &body[..end];
        }
    }
    pattern
}

impl Rule {
    /// 按规则名构造
    pub fn from_name(name: &str, params: &[&str]) -> Result<Rule, Exception> {
        let rule = match name {
            "not_empty" => Rule::NotEmpty,
            "required" => Rule::Required,
            "is_int" => Rule::IsInt,
            "contains_int" => Rule::ContainsInt,
            "is_alpha" => Rule::IsAlpha,
            "contains_alpha" => Rule::ContainsAlpha,
            "is_alphanum" => Rule::IsAlphanum,
            "is_alphanum_extra" => Rule::IsAlphanumExtra,
            "is_text" => Rule::IsText,
            "is_upper" => Rule::IsUpper,
            "contains_upper" => Rule::ContainsUpper,
            "contains" => Rule::Contains(param(name, params, 0)?.to_string()),
            "not_contains" => Rule::NotContains(param(name, params, 0)?.to_string()),
            "contains_special_char" => Rule::ContainsSpecialChar,
            "min_length" => Rule::MinLength(number_param(name, params, 0)?),
            "max_length" => Rule::MaxLength(number_param(name, params, 0)?),
            "in_range" => Rule::InRange(
                number_param(name, params, 0)?,
                number_param(name, params, 1)?,
            ),
            "is_email" => Rule::IsEmail,
            "is_url" => Rule::IsUrl,
            "matches_regexp" => Rule::MatchesRegexp(param(name, params, 0)?.to_string()),
            "is_time" => Rule::IsTime,
            "is_date" => Rule::IsDate(
                params
                    .first()
                    .copied()
                    .unwrap_or(DEFAULT_DATE_FORMAT)
                    .to_string(),
            ),
            "is_sql_date" => Rule::IsSqlDate,
            "must_match_password" => Rule::MustMatchPassword(param(name, params, 0)?.to_string()),
            "not_past_password" => Rule::NotPastPassword(param(name, params, 0)?.to_string()),
            _ => {
                return Err(Exception::InvalidValidationRule(format!(
                    "Invalid rule provided [{}]",
                    name
                )))
            }
        };
        Ok(rule)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rule::NotEmpty => "not_empty",
            Rule::Required => "required",
            Rule::IsInt => "is_int",
            Rule::ContainsInt => "contains_int",
            Rule::IsAlpha => "is_alpha",
            Rule::ContainsAlpha => "contains_alpha",
            Rule::IsAlphanum => "is_alphanum",
            Rule::IsAlphanumExtra => "is_alphanum_extra",
            Rule::IsText => "is_text",
            Rule::IsUpper => "is_upper",
            Rule::ContainsUpper => "contains_upper",
            Rule::Contains(_) => "contains",
            Rule::NotContains(_) => "not_contains",
            Rule::ContainsSpecialChar => "contains_special_char",
            Rule::MinLength(_) => "min_length",
            Rule::MaxLength(_) => "max_length",
            Rule::InRange(..) => "in_range",
            Rule::IsEmail => "is_email",
            Rule::IsUrl => "is_url",
            Rule::MatchesRegexp(_) => "matches_regexp",
            Rule::IsTime => "is_time",
            Rule::IsDate(_) => "is_date",
            Rule::IsSqlDate => "is_sql_date",
            Rule::MustMatchPassword(_) => "must_match_password",
            Rule::NotPastPassword(_) => "not_past_password",
        }
    }

    /// 检查 `value` 是否满足规则
    pub fn check(&self, value: &str) -> Result<bool, Exception> {
        let passed = match self {
            Rule::NotEmpty | Rule::Required => {
                let trimmed = value.trim();
                !trimmed.is_empty() && trimmed != "0"
            }
            Rule::IsInt => IS_INT.is_match(value),
            Rule::ContainsInt => CONTAINS_INT.is_match(value),
            Rule::IsAlpha => IS_ALPHA.is_match(value),
            Rule::ContainsAlpha => CONTAINS_ALPHA.is_match(value),
            Rule::IsAlphanum => IS_ALPHANUM.is_match(value),
            Rule::IsAlphanumExtra => IS_ALPHANUM_EXTRA.is_match(value),
            Rule::IsText => IS_TEXT.is_match(value),
            Rule::IsUpper => IS_UPPER.is_match(value),
            Rule::ContainsUpper => CONTAINS_UPPER.is_match(value),
            Rule::Contains(needle) => value.contains(needle.as_str()),
            Rule::NotContains(needle) => !value.contains(needle.as_str()),
            Rule::ContainsSpecialChar => CONTAINS_SPECIAL.is_match(value),
            Rule::MinLength(min) => value.len() >= *min,
            Rule::MaxLength(max) => value.len() <= *max,
            Rule::InRange(min, max) => value.len() >= *min && value.len() <= *max,
            Rule::IsEmail => IS_EMAIL.is_match(value),
            Rule::IsUrl => IS_URL.is_match(value),
            Rule::MatchesRegexp(pattern) => {
                let regex = Regex::new(strip_delimiters(pattern)).map_err(|e| {
                    Exception::InvalidValidationRule(format!("matches_regexp: {}", e))
                })?;
                regex.is_match(value)
            }
            Rule::IsTime => match IS_TIME.captures(value) {
                Some(caps) => {
                    let hours: u32 = caps[1].parse().unwrap_or(99);
                    let minutes: u32 = caps[2].parse().unwrap_or(99);
                    hours <= 23 && minutes <= 59
                }
                None => false,
            },
            Rule::IsDate(format) => {
                let pattern = date_pattern(format);
                match NaiveDate::parse_from_str(value, &pattern) {
                    Ok(date) => date.format(&pattern).to_string() == value,
                    Err(_) => false,
                }
            }
            Rule::IsSqlDate => {
                IS_SQL_DATE.is_match(value)
                    && Rule::IsDate(DEFAULT_DATE_FORMAT.to_string()).check(value)?
            }
            Rule::MustMatchPassword(other) => value == other.trim(),
            Rule::NotPastPassword(past) => value != past,
        };
        Ok(passed)
    }

    /// 规则未通过时的提示
    pub fn message(&self, field: &str) -> String {
        match self {
            Rule::NotEmpty => format!("{} can not be empty", field),
            Rule::Required => format!("{} is required", field),
            Rule::IsInt => format!("{} must be a number", field),
            Rule::ContainsInt => format!("{} must contain a number", field),
            Rule::IsAlpha => format!("{} must only contain alpha characters", field),
            Rule::ContainsAlpha => format!("{} must contain alpha characters", field),
            Rule::IsAlphanum => format!("{} must only contain alpha-numeric characters", field),
            Rule::IsAlphanumExtra => format!(
                "{} must only contain alpha-numeric characters, underscore, period or dash",
                field
            ),
            Rule::IsText => format!("{} must be English-language text characters", field),
            Rule::IsUpper => format!("{} must be uppercase", field),
            Rule::ContainsUpper => format!("{} must contain an uppercase character", field),
            Rule::Contains(needle) => format!("{} must contain {}", field, needle),
            Rule::NotContains(needle) => format!("{} must not contain {}", field, needle),
            Rule::ContainsSpecialChar => format!("{} must contain a special character", field),
            Rule::MinLength(min) => format!("{} must be a minimum of {} characters", field, min),
            Rule::MaxLength(max) => format!("{} must be a maximum of {} characters", field, max),
            Rule::InRange(min, max) => {
                format!("{} must be between {} and {} characters", field, min, max)
            }
            Rule::IsEmail => format!("{} must be a valid email address", field),
            Rule::IsUrl => format!("{} must be a valid URL", field),
            Rule::MatchesRegexp(_) => format!("{} does not match the criteria", field),
            Rule::IsTime => format!("{} must be a valid time in format HH:MM", field),
            Rule::IsDate(format) => format!("{} must be a valid date in format {}", field, format),
            Rule::IsSqlDate => format!("{} must be a valid date in format yyyy-mm-dd", field),
            Rule::MustMatchPassword(_) => "both passwords must match".to_string(),
            Rule::NotPastPassword(_) => format!("{} must not be a previous password", field),
        }
    }
}

/// 一个待校验的值
#[derive(Debug, Clone, Default)]
pub struct ValidationValue {
    value: String,
    rules: Vec<Rule>,
    errors: Vec<Rule>,
}

impl ValidationValue {
    pub fn new(value: &str, rules: Vec<Rule>) -> Self {
        let mut validation = Self {
            value: value.to_string(),
            ..Self::default()
        };
        validation.set_rules(rules);
        validation
    }

    /// 密码预设规则：包含数字、大写字母、字母、特殊字符，长度 5 到 40
    pub fn password(value: &str, extra: Vec<Rule>) -> Self {
        let mut validation = Self::new(
            value,
            vec![
                Rule::ContainsInt,
                Rule::ContainsUpper,
                Rule::ContainsAlpha,
                Rule::ContainsSpecialChar,
                Rule::InRange(5, 40),
            ],
        );
        validation.set_rules(extra);
        validation
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn set_rules(&mut self, rules: Vec<Rule>) {
        for rule in rules {
            match self.rules.iter_mut().find(|r| r.name() == rule.name()) {
                Some(existing) => *existing = rule,
                None => self.rules.push(rule),
            }
        }
    }

    /// 按规则名追加，参数按字符串给出
    pub fn add_rule(&mut self, name: &str, params: &[&str]) -> Result<(), Exception> {
        let rule = Rule::from_name(name, params)?;
        self.set_rules(vec![rule]);
        Ok(())
    }

    pub fn valid(&mut self) -> Result<bool, Exception> {
        let mut failed = Vec::new();
        for rule in &self.rules {
            if !rule.check(&self.value)? {
                failed.push(rule.clone());
            }
        }
        self.errors = failed;
        Ok(self.errors.is_empty())
    }

    /// 上一次校验未通过的规则
    pub fn errors(&self) -> &[Rule] {
        &self.errors
    }

    pub fn messages(&self, field: &str) -> Vec<String> {
        self.errors.iter().map(|rule| rule.message(field)).collect()
    }
}

/// 多字段表单校验
#[derive(Debug, Clone, Default)]
pub struct FormValidator {
    fields: Vec<(String, ValidationValue)>,
    errors: Vec<String>,
}

impl FormValidator {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, ValidationValue)>,
        S: Into<String>,
    {
        let mut validator = Self::default();
        for (name, value) in fields {
            validator.add_field(name, value);
        }
        validator
    }

    pub fn add_field<S: Into<String>>(&mut self, name: S, value: ValidationValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn set_field_rules(&mut self, name: &str, rules: Vec<Rule>) {
        if let Some((_, value)) = self.fields.iter_mut().find(|(n, _)| n == name) {
            value.set_rules(rules);
        }
    }

    pub fn validate(&mut self) -> Result<bool, Exception> {
        let mut errors = Vec::new();
        for (name, value) in self.fields.iter_mut() {
            if !value.valid()? {
                errors.extend(value.messages(name));
            }
        }
        self.errors = errors;
        Ok(self.errors.is_empty())
    }

    /// 所有字段的失败提示，按字段和规则的设置顺序排列
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(rule: Rule, value: &str) -> bool {
        rule.check(value).unwrap()
    }

    #[test]
    fn test_character_class_rules() {
        assert!(check(Rule::IsInt, "0123"));
        assert!(!check(Rule::IsInt, "12a"));
        assert!(check(Rule::ContainsInt, "ab1"));
        assert!(check(Rule::IsAlpha, "abcXYZ"));
        assert!(!check(Rule::IsAlpha, "abc1"));
        assert!(check(Rule::IsAlphanumExtra, "a_b.c-1"));
        assert!(!check(Rule::IsAlphanum, "a_b"));
        assert!(check(Rule::IsText, "Hello, world; ok?"));
        assert!(check(Rule::IsUpper, "ABC"));
        assert!(check(Rule::ContainsSpecialChar, "abc!"));
        assert!(!check(Rule::ContainsSpecialChar, "abc def"));
    }

    #[test]
    fn test_required_trims() {
        assert!(!check(Rule::Required, "   "));
        assert!(!check(Rule::NotEmpty, "0"));
        assert!(check(Rule::Required, " x "));
    }

    #[test]
    fn test_length_rules() {
        assert!(check(Rule::MinLength(3), "abc"));
        assert!(!check(Rule::MaxLength(2), "abc"));
        assert!(check(Rule::InRange(5, 40), "abcde"));
        assert!(!check(Rule::InRange(5, 40), "abcd"));
    }

    #[test]
    fn test_email_and_url() {
        assert!(check(Rule::IsEmail, "user.name+tag@example.co.uk"));
        assert!(!check(Rule::IsEmail, "user@"));
        assert!(!check(Rule::IsEmail, "no-at-sign.com"));
        assert!(check(Rule::IsUrl, "https://example.com/path?q=1"));
        assert!(!check(Rule::IsUrl, "example.com"));
    }

    #[test]
    fn test_time_and_dates() {
        assert!(check(Rule::IsTime, "23:59"));
        assert!(!check(Rule::IsTime, "24:00"));
        assert!(!check(Rule::IsTime, "9:00"));
        assert!(check(Rule::IsSqlDate, "2024-02-29"));
        assert!(!check(Rule::IsSqlDate, "2023-02-29"));
        assert!(check(Rule::IsDate("dd/mm/yyyy".into()), "31/12/2020"));
        assert!(!check(Rule::IsDate("dd/mm/yyyy".into()), "2020-12-31"));
    }

    #[test]
    fn test_matches_regexp_with_delimiters() {
        assert!(check(Rule::MatchesRegexp("/^ab+$/".into()), "abbb"));
        assert!(check(Rule::MatchesRegexp("^x".into()), "xyz"));
        assert!(matches!(
            Rule::MatchesRegexp("(".into()).check("x"),
            Err(Exception::InvalidValidationRule(_))
        ));
    }

    #[test]
    fn test_rule_from_name() {
        assert_eq!(
            Rule::from_name("in_range", &["5", "40"]).unwrap(),
            Rule::InRange(5, 40)
        );
        assert_eq!(
            Rule::from_name("is_date", &[]).unwrap(),
            Rule::IsDate("yyyy-mm-dd".into())
        );
        assert!(Rule::from_name("is_magic", &[]).is_err());
        assert!(Rule::from_name("min_length", &["x"]).is_err());
        assert!(Rule::from_name("contains", &[]).is_err());
    }

    #[test]
    fn test_same_rule_replaces_params() {
        let mut value = ValidationValue::new("abcdef", vec![Rule::MaxLength(3)]);
        value.add_rule("max_length", &["10"]).unwrap();
        assert_eq!(value.rules(), &[Rule::MaxLength(10)]);
        assert!(value.valid().unwrap());
    }

    #[test]
    fn test_password_presets() {
        let mut weak = ValidationValue::password("abc", vec![]);
        assert!(!weak.valid().unwrap());
        assert_eq!(
            weak.messages("Password"),
            vec![
                "Password must contain a number",
                "Password must contain an uppercase character",
                "Password must contain a special character",
                "Password must be between 5 and 40 characters",
            ]
        );

        let mut strong = ValidationValue::password(
            "Secret1!",
            vec![Rule::MustMatchPassword(" Secret1! ".into())],
        );
        assert!(strong.valid().unwrap());
    }

    #[test]
    fn test_form_validator_messages() {
        let mut form = FormValidator::new([
            ("Email", ValidationValue::new("bad", vec![Rule::Required, Rule::IsEmail])),
            (
                "Password",
                ValidationValue::password("Secret1!", vec![Rule::MustMatchPassword("other".into())]),
            ),
        ]);
        assert!(!form.validate().unwrap());
        assert_eq!(
            form.errors(),
            &[
                "Email must be a valid email address".to_string(),
                "both passwords must match".to_string(),
            ]
        );
    }

    #[test]
    fn test_form_validator_set_field_rules() {
        let mut form = FormValidator::new([("Name", ValidationValue::new("", vec![]))]);
        assert!(form.validate().unwrap());
        form.set_field_rules("Name", vec![Rule::Required]);
        assert!(!form.validate().unwrap());
        assert_eq!(form.errors(), &["Name is required".to_string()]);
    }
}
