use super::filter::MonthFilter;
use super::Event;
use chrono::NaiveDate;
use minijinja::value::{StructObject, Value};

impl StructObject for Event {
    fn get_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" => Value::from(self.id.clone()),
            "title" => Value::from(self.title.clone()),
            "description" => Value::from(self.description.clone()),
            // Human readable date, falls back to the stored value if it does not parse.
            "date" => match self.calendar_date() {
                Some(date) => Value::from(date.format("%B %-d, %Y").to_string()),
                None => Value::from(self.date.clone()),
            },
            // One address part per line.
            "address" => Value::from(self.location.replace(", ", "\n")),
            "image_url" => {
                if self.image.is_empty() {
                    return None;
                }

                if self.image.starts_with("http://") || self.image.starts_with("https://") {
                    Value::from(self.image.clone())
                } else {
                    Value::from(format!("/static/{}", self.image.trim_start_matches('/')))
                }
            }
            "url" => Value::from(format!("/events/{}", self.id)),
            "is_featured" => Value::from(self.is_featured),
            _ => return None,
        };

        Some(value)
    }
}

impl StructObject for MonthFilter {
    fn get_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "year" => Value::from(self.year()),
            "month" => Value::from(self.month()),
            // E.g. "May 2021".
            "title" => {
                let first_day = NaiveDate::from_ymd_opt(self.year(), self.month(), 1)?;
                Value::from(first_day.format("%B %Y").to_string())
            }
            _ => return None,
        };

        Some(value)
    }
}

/// Converts events into template values.
pub fn to_values<I>(events: I) -> Vec<Value>
where
    I: IntoIterator<Item = Event>,
{
    events.into_iter().map(Value::from_struct_object).collect()
}
