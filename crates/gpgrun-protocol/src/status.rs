use serde::{Deserialize, Serialize};

/// Declares the fixed status-keyword table once and derives every lookup
/// from it, so names, numeric codes, and variants can never drift apart.
macro_rules! status_table {
    ($(($variant:ident, $code:literal, $name:literal)),+ $(,)?) => {
        /// A status keyword reported by gpg on the status channel.
        ///
        /// `Unknown` covers keywords added by newer gpg versions; they are
        /// passed through as events rather than rejected.
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[serde(rename_all = "snake_case")]
        pub enum StatusCode {
            Unknown,
            $($variant,)+
        }

        impl StatusCode {
            /// Wire keyword for this code, e.g. `"NEED_PASSPHRASE"`.
            pub fn name(self) -> &'static str {
                match self {
                    StatusCode::Unknown => "UNKNOWN",
                    $(StatusCode::$variant => $name,)+
                }
            }

            /// Stable numeric code for this keyword (0 = unknown).
            pub fn code(self) -> u16 {
                match self {
                    StatusCode::Unknown => 0,
                    $(StatusCode::$variant => $code,)+
                }
            }

            /// Looks up a wire keyword; unknown keywords map to `Unknown`.
            pub fn from_name(name: &str) -> StatusCode {
                match name {
                    $($name => StatusCode::$variant,)+
                    _ => StatusCode::Unknown,
                }
            }

            /// Reverse lookup by numeric code.
            pub fn from_code(code: u16) -> StatusCode {
                match code {
                    $($code => StatusCode::$variant,)+
                    _ => StatusCode::Unknown,
                }
            }

            /// All known codes, in table order.
            pub fn all() -> &'static [StatusCode] {
                &[$(StatusCode::$variant,)+]
            }
        }
    };
}

status_table! {
    (NewSig, 1, "NEWSIG"),
    (GoodSig, 2, "GOODSIG"),
    (ExpSig, 3, "EXPSIG"),
    (ExpKeySig, 4, "EXPKEYSIG"),
    (RevKeySig, 5, "REVKEYSIG"),
    (BadSig, 6, "BADSIG"),
    (ErrSig, 7, "ERRSIG"),
    (ValidSig, 8, "VALIDSIG"),
    (SigId, 9, "SIG_ID"),
    (SigCreated, 10, "SIG_CREATED"),
    (SigExpired, 11, "SIGEXPIRED"),
    (EncTo, 12, "ENC_TO"),
    (BeginDecryption, 13, "BEGIN_DECRYPTION"),
    (EndDecryption, 14, "END_DECRYPTION"),
    (DecryptionInfo, 15, "DECRYPTION_INFO"),
    (DecryptionOkay, 16, "DECRYPTION_OKAY"),
    (DecryptionFailed, 17, "DECRYPTION_FAILED"),
    (Plaintext, 18, "PLAINTEXT"),
    (PlaintextLength, 19, "PLAINTEXT_LENGTH"),
    (BeginEncryption, 20, "BEGIN_ENCRYPTION"),
    (EndEncryption, 21, "END_ENCRYPTION"),
    (BeginSigning, 22, "BEGIN_SIGNING"),
    (UserIdHint, 23, "USERID_HINT"),
    (NeedPassphrase, 24, "NEED_PASSPHRASE"),
    (NeedPassphraseSym, 25, "NEED_PASSPHRASE_SYM"),
    (NeedPassphrasePin, 26, "NEED_PASSPHRASE_PIN"),
    (MissingPassphrase, 27, "MISSING_PASSPHRASE"),
    (GoodPassphrase, 28, "GOOD_PASSPHRASE"),
    (BadPassphrase, 29, "BAD_PASSPHRASE"),
    (GetBool, 30, "GET_BOOL"),
    (GetLine, 31, "GET_LINE"),
    (GetHidden, 32, "GET_HIDDEN"),
    (GotIt, 33, "GOT_IT"),
    (TrustUndefined, 34, "TRUST_UNDEFINED"),
    (TrustNever, 35, "TRUST_NEVER"),
    (TrustMarginal, 36, "TRUST_MARGINAL"),
    (TrustFully, 37, "TRUST_FULLY"),
    (TrustUltimate, 38, "TRUST_ULTIMATE"),
    (KeyCreated, 39, "KEY_CREATED"),
    (KeyNotCreated, 40, "KEY_NOT_CREATED"),
    (KeyConsidered, 41, "KEY_CONSIDERED"),
    (KeyExpired, 42, "KEYEXPIRED"),
    (KeyRevoked, 43, "KEYREVOKED"),
    (ImportOk, 44, "IMPORT_OK"),
    (ImportProblem, 45, "IMPORT_PROBLEM"),
    (ImportRes, 46, "IMPORT_RES"),
    (Imported, 47, "IMPORTED"),
    (Exported, 48, "EXPORTED"),
    (ExportRes, 49, "EXPORT_RES"),
    (NoPubkey, 50, "NO_PUBKEY"),
    (NoSeckey, 51, "NO_SECKEY"),
    (NoData, 52, "NODATA"),
    (Unexpected, 53, "UNEXPECTED"),
    (Truncated, 54, "TRUNCATED"),
    (InvRecp, 55, "INV_RECP"),
    (InvSgnr, 56, "INV_SGNR"),
    (NoRecp, 57, "NO_RECP"),
    (NoSgnr, 58, "NO_SGNR"),
    (FileStart, 59, "FILE_START"),
    (FileDone, 60, "FILE_DONE"),
    (FileError, 61, "FILE_ERROR"),
    (Progress, 62, "PROGRESS"),
    (PinentryLaunched, 63, "PINENTRY_LAUNCHED"),
    (CardCtrl, 64, "CARDCTRL"),
    (ScOpFailure, 65, "SC_OP_FAILURE"),
    (ScOpSuccess, 66, "SC_OP_SUCCESS"),
    (NotationName, 67, "NOTATION_NAME"),
    (NotationData, 68, "NOTATION_DATA"),
    (PolicyUrl, 69, "POLICY_URL"),
    (Attribute, 70, "ATTRIBUTE"),
    (Warning, 71, "WARNING"),
    (Error, 72, "ERROR"),
    (Failure, 73, "FAILURE"),
    (Success, 74, "SUCCESS"),
}

impl StatusCode {
    /// True for codes that demand a synchronous answer on the command
    /// channel before gpg will make progress.
    pub fn is_interactive(self) -> bool {
        matches!(
            self,
            StatusCode::NeedPassphrase
                | StatusCode::NeedPassphraseSym
                | StatusCode::NeedPassphrasePin
                | StatusCode::GetBool
                | StatusCode::GetLine
                | StatusCode::GetHidden
        )
    }
}
