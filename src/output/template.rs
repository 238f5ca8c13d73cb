//! Output file path templates
//!
//! Templates use `{key}` placeholders, with an optional strftime format for
//! the time keys: `{start_time:%Y%m%d}`. `{{` and `}}` produce literal braces.
//!
//! | key          | value                                        |
//! |--------------|----------------------------------------------|
//! | `name`       | output product name                          |
//! | `var_name`   | output variable name (per-variable sinks)    |
//! | `x`, `y`     | grid cell index of the task                  |
//! | `start_time` | period start, `%Y-%m-%d` unless formatted   |
//! | `end_time`   | period end, `%Y-%m-%d` unless formatted     |

use crate::errors::{Result, StatsError};
use crate::tasks::TemplateContext;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d";

/// Expand `template` for one product, and optionally one variable, of a task
///
/// # Errors
///
/// Returns a configuration error for unknown or unavailable keys, bad
/// formats and unbalanced braces.
pub fn render(template: &str, name: &str, var_name: Option<&str>, context: &TemplateContext) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(StatsError::config(format!(
                                "unterminated placeholder in path template '{template}'"
                            )))
                        }
                    }
                }
                out.push_str(&expand(&field, name, var_name, context, template)?);
            }
            '}' => {
                return Err(StatsError::config(format!(
                    "unmatched '}}' in path template '{template}'"
                )))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn expand(
    field: &str,
    name: &str,
    var_name: Option<&str>,
    context: &TemplateContext,
    template: &str,
) -> Result<String> {
    let (key, format) = match field.split_once(':') {
        Some((key, format)) => (key, Some(format)),
        None => (field, None),
    };
    let unavailable = || StatsError::config(format!("'{{{key}}}' is not available in path template '{template}'"));

    let value = match key {
        "start_time" => return format_time(context.start_time, format.unwrap_or(DEFAULT_TIME_FORMAT)),
        "end_time" => return format_time(context.end_time, format.unwrap_or(DEFAULT_TIME_FORMAT)),
        "name" => name.to_string(),
        "var_name" => var_name.ok_or_else(unavailable)?.to_string(),
        "x" => context.tile_index.ok_or_else(unavailable)?.x.to_string(),
        "y" => context.tile_index.ok_or_else(unavailable)?.y.to_string(),
        other => {
            return Err(StatsError::config(format!(
                "unknown key '{other}' in path template '{template}'"
            )))
        }
    };
    if let Some(format) = format {
        return Err(StatsError::config(format!(
            "format '{format}' is only supported for time keys, not '{key}'"
        )));
    }
    Ok(value)
}

fn format_time(t: DateTime<Utc>, format: &str) -> Result<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(StatsError::config(format!("invalid time format '{format}'")));
    }
    Ok(t.format_with_items(items.into_iter()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TileIndex;
    use chrono::TimeZone;

    fn context(tile_index: Option<TileIndex>) -> TemplateContext {
        TemplateContext {
            tile_index,
            start_time: Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn renders_grid_template() {
        let path = render(
            "{name}/{x}_{y}/LS_{var_name}_{x}_{y}_{start_time:%Y%m%d}_{end_time}.nc",
            "nbar_mean",
            Some("red"),
            &context(Some(TileIndex::new(15, -40))),
        )
        .unwrap();
        assert_eq!(path, "nbar_mean/15_-40/LS_red_15_-40_20150101_2016-01-01.nc");
    }

    #[test]
    fn escaped_braces() {
        let path = render("{{literal}}_{name}", "p", None, &context(None)).unwrap();
        assert_eq!(path, "{literal}_p");
    }

    #[test]
    fn unavailable_and_unknown_keys() {
        assert!(render("{x}.nc", "p", None, &context(None)).is_err());
        assert!(render("{var_name}.nc", "p", None, &context(None)).is_err());
        assert!(render("{tile}.nc", "p", None, &context(None)).is_err());
        assert!(render("{name.nc", "p", None, &context(None)).is_err());
        assert!(render("{name:%Y}.nc", "p", None, &context(None)).is_err());
    }
}
