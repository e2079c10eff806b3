//! Core data records plus the folder and message flag bitmasks.

use serde::{Deserialize, Serialize};

/// Per-folder flag bits (`folders.flags`), named rather than left as an
/// opaque integer so `PRIVATE` (Unmatched's distinguishing bit) and the
/// system/virtual-trash kinds round-trip meaningfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FolderFlags(pub u32);

impl FolderFlags {
    pub const NOSELECT: u32 = 1 << 0;
    pub const NOINFERIORS: u32 = 1 << 1;
    pub const CHILDREN: u32 = 1 << 2;
    pub const NOCHILDREN: u32 = 1 << 3;
    pub const SUBSCRIBED: u32 = 1 << 4;
    pub const VIRTUAL: u32 = 1 << 5;
    pub const SYSTEM: u32 = 1 << 6;
    pub const VTRASH: u32 = 1 << 7;
    pub const VJUNK: u32 = 1 << 8;
    pub const SHARED_TO_ME: u32 = 1 << 9;
    pub const SHARED_BY_ME: u32 = 1 << 10;
    /// Unmatched's distinguishing bit.
    pub const PRIVATE: u32 = 1 << 11;

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }
}

/// Message flag bits folded into `flags`, alongside the named boolean
/// columns kept separately (`read`, `deleted`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(pub u32);

impl MessageFlags {
    pub const SEEN: u32 = 1 << 0;
    pub const ANSWERED: u32 = 1 << 1;
    pub const FLAGGED: u32 = 1 << 2;
    pub const DELETED: u32 = 1 << 3;
    pub const DRAFT: u32 = 1 << 4;
    pub const ATTACHMENTS: u32 = 1 << 5;
    pub const JUNK: u32 = 1 << 6;
    pub const JUNK_LEARN: u32 = 1 << 7;
    pub const SECURE: u32 = 1 << 8;
    pub const NOTJUNK: u32 = 1 << 9;

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

/// A message-info row. Primary key is `uid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfoRecord {
    pub uid: String,

    // Flag bits.
    pub flags: u32,
    pub read: bool,
    pub deleted: bool,
    pub replied: bool,
    pub important: bool,
    pub junk: bool,
    pub attachment: bool,
    pub dirty: bool,

    // Identity.
    pub subject: Option<String>,
    pub mail_from: Option<String>,
    pub mail_to: Option<String>,
    pub mail_cc: Option<String>,
    pub mlist: Option<String>,

    // Time (epoch seconds).
    pub dsent: i64,
    pub dreceived: i64,
    pub created: i64,
    pub modified: i64,

    // Structure.
    pub part: Option<String>,
    pub labels: Option<String>,
    pub usertags: Option<String>,
    pub cinfo: Option<String>,
    pub bdata: Option<String>,
    pub size: i64,

    // Follow-up.
    pub followup_flag: Option<String>,
    pub followup_completed_on: Option<i64>,
    pub followup_due_by: Option<i64>,

    /// `<name>_bodystructure.bodystructure`, written in the same savepoint
    /// when present.
    pub bodystructure: Option<String>,
}

impl MessageInfoRecord {
    /// A minimal record carrying just the primary key, timestamps left for
    /// the store to fill with `strftime('%s','now')`.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            flags: 0,
            read: false,
            deleted: false,
            replied: false,
            important: false,
            junk: false,
            attachment: false,
            dirty: false,
            subject: None,
            mail_from: None,
            mail_to: None,
            mail_cc: None,
            mlist: None,
            dsent: 0,
            dreceived: 0,
            created: 0,
            modified: 0,
            part: None,
            labels: None,
            usertags: None,
            cinfo: None,
            bdata: None,
            size: 0,
            followup_flag: None,
            followup_completed_on: None,
            followup_due_by: None,
            bodystructure: None,
        }
    }
}

/// A folder-info row, held in the global `folders` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderInfoRecord {
    pub name: String,
    pub version: i32,
    pub flags: u32,
    pub nextuid: i64,
    pub time: i64,
    pub saved_count: i64,
    pub unread_count: i64,
    pub deleted_count: i64,
    pub junk_count: i64,
    pub visible_count: i64,
    pub jnd_count: i64,
    pub bdata: Option<String>,
}

impl FolderInfoRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 2,
            flags: 0,
            nextuid: 1,
            time: 0,
            saved_count: 0,
            unread_count: 0,
            deleted_count: 0,
            junk_count: 0,
            visible_count: 0,
            jnd_count: 0,
            bdata: None,
        }
    }
}

/// A preview row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRow {
    pub uid: String,
    pub preview: String,
}

/// A tombstone row from `Deletes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TombstoneRow {
    pub id: i64,
    pub uid: String,
    pub time: i64,
    pub mailbox: String,
}

/// Known column identifiers for the message-info table, used to build a
/// column-index -> ident map from a query's first row so row decoding
/// tolerates column-order changes across schema migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnIdent {
    Uid,
    Flags,
    Read,
    Deleted,
    Replied,
    Important,
    Junk,
    Attachment,
    Dirty,
    Subject,
    MailFrom,
    MailTo,
    MailCc,
    Mlist,
    Dsent,
    Dreceived,
    Created,
    Modified,
    Part,
    Labels,
    Usertags,
    Cinfo,
    Bdata,
    Size,
    FollowupFlag,
    FollowupCompletedOn,
    FollowupDueBy,
    Unknown,
}

impl ColumnIdent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "uid" => ColumnIdent::Uid,
            "flags" => ColumnIdent::Flags,
            "read" => ColumnIdent::Read,
            "deleted" => ColumnIdent::Deleted,
            "replied" => ColumnIdent::Replied,
            "important" => ColumnIdent::Important,
            "junk" => ColumnIdent::Junk,
            "attachment" => ColumnIdent::Attachment,
            "dirty" => ColumnIdent::Dirty,
            "subject" => ColumnIdent::Subject,
            "mail_from" => ColumnIdent::MailFrom,
            "mail_to" => ColumnIdent::MailTo,
            "mail_cc" => ColumnIdent::MailCc,
            "mlist" => ColumnIdent::Mlist,
            "dsent" => ColumnIdent::Dsent,
            "dreceived" => ColumnIdent::Dreceived,
            "created" => ColumnIdent::Created,
            "modified" => ColumnIdent::Modified,
            "part" => ColumnIdent::Part,
            "labels" => ColumnIdent::Labels,
            "usertags" => ColumnIdent::Usertags,
            "cinfo" => ColumnIdent::Cinfo,
            "bdata" => ColumnIdent::Bdata,
            "size" => ColumnIdent::Size,
            "followup_flag" => ColumnIdent::FollowupFlag,
            "followup_completed_on" => ColumnIdent::FollowupCompletedOn,
            "followup_due_by" => ColumnIdent::FollowupDueBy,
            _ => ColumnIdent::Unknown,
        }
    }
}
