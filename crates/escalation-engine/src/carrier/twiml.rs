//! Carrier control-document builder
//!
//! Minimal TwiML-style XML responses. Webhooks must always answer with a
//! valid document, so the builder is infallible and escapes everything.

use std::fmt::Write as _;

/// One gather of DTMF digits.
#[derive(Debug, Clone)]
pub struct Gather {
    pub num_digits: u32,
    pub timeout_secs: u32,
    pub action_url: String,
    /// Verbs nested inside the gather (played while listening).
    pub inner: Twiml,
}

/// Dial of a single number with a completion action.
#[derive(Debug, Clone)]
pub struct Dial {
    pub number: String,
    pub timeout_secs: u32,
    pub caller_id: String,
    pub action_url: String,
}

#[derive(Debug, Clone)]
enum Verb {
    Say(String),
    Play(String),
    Pause(u32),
    Gather(Box<Gather>),
    Dial(Dial),
    ConnectStream { url: String, params: Vec<(String, String)> },
    Redirect(String),
    /// SMS reply body (for messaging webhooks).
    Message(String),
    Hangup,
}

/// A response document under construction.
#[derive(Debug, Clone, Default)]
pub struct Twiml {
    verbs: Vec<Verb>,
}

impl Twiml {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    pub fn play(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Play(url.into()));
        self
    }

    pub fn pause(mut self, seconds: u32) -> Self {
        self.verbs.push(Verb::Pause(seconds));
        self
    }

    pub fn gather(mut self, gather: Gather) -> Self {
        self.verbs.push(Verb::Gather(Box::new(gather)));
        self
    }

    pub fn dial(mut self, dial: Dial) -> Self {
        self.verbs.push(Verb::Dial(dial));
        self
    }

    /// Open a bidirectional media stream to the voice bridge.
    pub fn connect_stream(
        mut self,
        url: impl Into<String>,
        params: Vec<(String, String)>,
    ) -> Self {
        self.verbs.push(Verb::ConnectStream {
            url: url.into(),
            params,
        });
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect(url.into()));
        self
    }

    /// Text an SMS back to the sender (messaging webhook responses).
    pub fn message(mut self, body: impl Into<String>) -> Self {
        self.verbs.push(Verb::Message(body.into()));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    /// Render the full XML document.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>");
        for verb in &self.verbs {
            render_verb(&mut out, verb);
        }
        out.push_str("</Response>");
        out
    }

    /// The graceful degradation document: every webhook falls back to this
    /// on internal error so the caller never hears a dead line.
    pub fn sorry_and_hangup() -> String {
        Twiml::new()
            .say("Sorry, something went wrong. Please try again later.")
            .hangup()
            .to_xml()
    }
}

fn render_verb(out: &mut String, verb: &Verb) {
    match verb {
        Verb::Say(text) => {
            let _ = write!(out, "<Say>{}</Say>", escape(text));
        }
        Verb::Play(url) => {
            let _ = write!(out, "<Play>{}</Play>", escape(url));
        }
        Verb::Pause(seconds) => {
            let _ = write!(out, "<Pause length=\"{seconds}\"/>");
        }
        Verb::Gather(gather) => {
            let _ = write!(
                out,
                "<Gather input=\"dtmf\" numDigits=\"{}\" timeout=\"{}\" action=\"{}\">",
                gather.num_digits,
                gather.timeout_secs,
                escape(&gather.action_url)
            );
            for inner in &gather.inner.verbs {
                render_verb(out, inner);
            }
            out.push_str("</Gather>");
        }
        Verb::Dial(dial) => {
            let _ = write!(
                out,
                "<Dial timeout=\"{}\" callerId=\"{}\" action=\"{}\"><Number>{}</Number></Dial>",
                dial.timeout_secs,
                escape(&dial.caller_id),
                escape(&dial.action_url),
                escape(&dial.number)
            );
        }
        Verb::ConnectStream { url, params } => {
            let _ = write!(out, "<Connect><Stream url=\"{}\">", escape(url));
            for (name, value) in params {
                let _ = write!(
                    out,
                    "<Parameter name=\"{}\" value=\"{}\"/>",
                    escape(name),
                    escape(value)
                );
            }
            out.push_str("</Stream></Connect>");
        }
        Verb::Redirect(url) => {
            let _ = write!(out, "<Redirect>{}</Redirect>", escape(url));
        }
        Verb::Message(body) => {
            let _ = write!(out, "<Message>{}</Message>", escape(body));
        }
        Verb::Hangup => out.push_str("<Hangup/>"),
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
