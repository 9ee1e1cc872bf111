//! Prompt catalog
//!
//! Canonical prompt keys and their spoken texts. The voice bridge renders
//! these through the TTS seam; keeping them in one table keeps retry
//! wording consistent across phases.

pub const WELCOME: &str =
    "Welcome to the roster line. Please enter your four digit PIN.";
pub const PIN_RETRY: &str = "That PIN didn't match. Please try again.";
pub const PROVIDER_SELECT_PREFIX: &str = "You work with more than one provider. ";
pub const PROVIDER_RETRY: &str = "Sorry, that wasn't one of the options.";
pub const JOB_CODE: &str =
    "Enter the job code for the shift, then press the pound key.";
pub const JOB_CODE_RETRY: &str =
    "We couldn't find a shift of yours with that code. Please try again.";
pub const JOB_OPTIONS: &str = "Press 1 to reschedule this shift. \
Press 2 to leave the shift open for someone else to take. \
Press 3 to talk to a representative. \
Press 4 to enter a different job code.";
pub const OPTIONS_RETRY: &str = "Sorry, that wasn't one of the options.";
pub const REASON: &str =
    "After the tone, briefly say why you are opening this shift, then press any key.";
pub const CONFIRM_LEAVE_OPEN: &str =
    "Press 1 to confirm opening this shift for someone else, or 2 to go back.";
pub const LEAVE_OPEN_DONE: &str =
    "Thank you. The shift is now open and we are finding a replacement. Goodbye.";
pub const COLLECT_DAY: &str = "Enter the new day of the month as two digits.";
pub const COLLECT_MONTH: &str = "Enter the new month as two digits.";
pub const COLLECT_TIME: &str =
    "Enter the new start time as four digits, using twenty four hour time.";
pub const DATE_RETRY: &str = "That date and time isn't valid. Let's try again.";
pub const RESCHEDULE_DONE: &str =
    "Your reschedule request has been recorded. Someone will confirm shortly. Goodbye.";
pub const TRANSFER: &str =
    "One moment while I connect you to a representative. Please hold.";
pub const ESCALATE: &str =
    "Let me connect you to someone who can help.";
pub const GOODBYE: &str = "Thank you, goodbye.";

/// Roster summary spoken before job-code entry.
pub fn shifts_today(count: usize) -> String {
    if count == 1 {
        "You have one shift on today's roster.".to_string()
    } else {
        format!("You have {count} shifts on today's roster.")
    }
}

/// Confirm prompt for a selected shift.
pub fn confirm_job(patient_name: &str, date: &str, time: &str) -> String {
    format!(
        "You selected the shift with {patient_name} on {date} at {time}. \
Press 1 to confirm, or 2 to enter a different code."
    )
}

/// Provider menu, one digit per provider.
pub fn provider_menu(names: &[String]) -> String {
    let mut out = String::from(PROVIDER_SELECT_PREFIX);
    for (i, name) in names.iter().enumerate().take(9) {
        out.push_str(&format!("Press {} for {}. ", i + 1, name));
    }
    out.trim_end().to_string()
}

/// Datetime confirmation.
pub fn confirm_datetime(day: u32, month: u32, hour: u32, minute: u32) -> String {
    format!(
        "You entered day {day}, month {month}, at {hour:02}{minute:02} hours. \
Press 1 to confirm, or 2 to start over."
    )
}
