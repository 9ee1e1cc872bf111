//! Message template rendering
//!
//! Templates use `{placeholder}` syntax over a closed variable set; any
//! placeholder outside the set renders literally, exactly as typed by the
//! provider.

use crate::records::{ShiftOccurrence, StaffMember};

/// The authoritative template variable set. No other names are recognised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub employee_name: String,
    pub patient_name: String,
    pub date: String,
    pub time: String,
    pub start_time: String,
    pub end_time: String,
    pub suburb: String,
}

impl TemplateVars {
    /// Build the variable set for one staff member and one occurrence,
    /// rendering date/time in the provider's zone.
    pub fn for_offer(occurrence: &ShiftOccurrence, staff: &StaffMember) -> Self {
        let local = occurrence.local_scheduled_at();
        Self {
            employee_name: staff.display_name.clone(),
            patient_name: occurrence.patient_name.clone(),
            date: local.format("%A %-d %B").to_string(),
            time: local.format("%-I:%M %p").to_string(),
            start_time: occurrence.window_start.format("%-I:%M %p").to_string(),
            end_time: occurrence.window_end.format("%-I:%M %p").to_string(),
            suburb: occurrence.suburb.clone(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "employeeName" => Some(&self.employee_name),
            "patientName" => Some(&self.patient_name),
            "date" => Some(&self.date),
            "time" => Some(&self.time),
            "startTime" => Some(&self.start_time),
            "endTime" => Some(&self.end_time),
            "suburb" => Some(&self.suburb),
            _ => None,
        }
    }

    /// Stable digest of the variable values, used as part of the TTS
    /// prompt cache key.
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for field in [
            &self.employee_name,
            &self.patient_name,
            &self.date,
            &self.time,
            &self.start_time,
            &self.end_time,
            &self.suburb,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        hex(&hasher.finalize())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Substitute `{name}` placeholders from the variable set. Unknown
/// placeholders (and unbalanced braces) pass through untouched.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.lookup(name) {
                    Some(value) => {
                        out.push_str(value);
                        rest = &after[close + 1..];
                    }
                    None => {
                        out.push('{');
                        rest = after;
                    }
                }
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
