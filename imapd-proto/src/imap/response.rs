//! Response construction helpers: everything that turns server-side state
//! into the `Data`/`Status` values `imap-codec` knows how to serialize.

use anyhow::Result;
use imap_codec::imap_types::command::Command;
use imap_codec::imap_types::core::{Tag, Text};
use imap_codec::imap_types::response::{Code, Data, Status};

#[derive(Debug, Clone)]
pub enum Body<'a> {
    Data(Data<'a>),
    Status(Status<'a>),
}

/// A tagged completion response plus whatever untagged data preceded it.
#[derive(Debug, Clone)]
pub struct Response<'a> {
    pub body: Vec<Body<'a>>,
    pub completion: Status<'a>,
}

impl Response<'static> {
    pub fn build() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// The untagged `* BYE` sent right before the connection is torn down.
    pub fn bye() -> Result<Response<'static>> {
        Ok(Response {
            body: vec![],
            completion: Status::bye(None, Text::try_from("IMAP4rev1 Server logging out")?)?,
        })
    }
}

#[derive(Default)]
pub struct ResponseBuilder {
    tag: Option<Tag<'static>>,
    code: Option<Code<'static>>,
    text: String,
    body: Vec<Body<'static>>,
}

impl ResponseBuilder {
    /// Tags the completion response to match the command it answers.
    pub fn to_req(mut self, cmd: &Command<'static>) -> Self {
        self.tag = Some(cmd.tag.clone());
        self
    }

    pub fn tag(mut self, tag: Tag<'static>) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn message(mut self, txt: impl Into<String>) -> Self {
        self.text = txt.into();
        self
    }

    pub fn code(mut self, code: Code<'static>) -> Self {
        self.code = Some(code);
        self
    }

    /// Appends one untagged data item to the response body.
    pub fn data(mut self, data: Data<'static>) -> Self {
        self.body.push(Body::Data(data));
        self
    }

    /// Appends several untagged data items to the response body.
    pub fn many_data(mut self, data: Vec<Data<'static>>) -> Self {
        self.body.extend(data.into_iter().map(Body::Data));
        self
    }

    /// Replaces the response body wholesale (used when the body was built up
    /// independently, e.g. IDLE drain events reused as a response body).
    pub fn set_body(mut self, body: Vec<Body<'static>>) -> Self {
        self.body = body;
        self
    }

    fn text(&self) -> Result<Text<'static>> {
        if self.text.is_empty() {
            Ok(Text::try_from("done")?)
        } else {
            Ok(Text::try_from(self.text.clone())?)
        }
    }

    pub fn ok(self) -> Result<Response<'static>> {
        let text = self.text()?;
        let completion = Status::ok(self.tag, self.code, text)?;
        Ok(Response {
            body: self.body,
            completion,
        })
    }

    pub fn no(self) -> Result<Response<'static>> {
        let text = self.text()?;
        let completion = Status::no(self.tag, self.code, text)?;
        Ok(Response {
            body: self.body,
            completion,
        })
    }

    pub fn bad(self) -> Result<Response<'static>> {
        let text = self.text()?;
        let completion = Status::bad(self.tag, self.code, text)?;
        Ok(Response {
            body: self.body,
            completion,
        })
    }
}

/// What a session loop does with a finished command: a normal response, or
/// one of the three IDLE-specific outcomes.
pub enum ResponseOrIdle {
    Response(Response<'static>),
    /// IDLE was accepted: `+ idling` was sent, hand the caller the stop
    /// signal to wait on alongside incoming client bytes.
    IdleAccept(std::sync::Arc<tokio::sync::Notify>),
    /// Untagged data produced while idling (mailbox changed).
    IdleEvent(Vec<Body<'static>>),
    /// IDLE could not be entered (e.g. no mailbox selected).
    IdleReject(Response<'static>),
}
