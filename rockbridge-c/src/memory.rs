use crate::ffi::rockbridge_result_t;
use std::ffi::CString;

/// Frees the message owned by a result returned from this library.
#[no_mangle]
pub extern "C" fn rockbridge_result_free(result: rockbridge_result_t) {
    if !result.message.is_null() {
        unsafe {
            let _ = CString::from_raw(result.message);
        }
    }
}
