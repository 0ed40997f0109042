//! Fixed user-facing replies.
//!
//! These are the only failure texts a user ever sees; details go to the logs.

/// Backend credentials are not configured.
pub const MISSING_CREDENTIALS: &str =
    "⚠️ پیکربندی سرور کامل نیست (API Key). لطفاً با پشتیبانی تماس بگیرید.";

/// Neither text nor images were supplied.
pub const EMPTY_INPUT: &str = "لطفاً متن سؤال یا تصویر را ارسال کنید.";

/// The backend could not be reached or rejected the request.
pub const SERVICE_UNAVAILABLE: &str = "🤔 سرویس پاسخ‌گو در حال حاضر در دسترس نیست یا به ورودی تصویر پاسخ نداد. لطفاً کمی بعد دوباره تلاش کنید.";

/// The backend answered with something unusable.
pub const INVALID_RESPONSE: &str = "🤔 پاسخ نامعتبر از سرویس دریافت شد.";

/// The tool loop ran out of steps.
pub const DID_NOT_COMPLETE: &str = "⚠️ فرایند چندمرحله‌ای کامل نشد.";

pub const UNEXPECTED: &str = "❗ خطای غیرمنتظره‌ای رخ داد. لطفاً دوباره تلاش کنید.";
