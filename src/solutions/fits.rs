// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read and write FITS calibration solutions.
//!
//! The primary HDU holds metadata in its header. Arrays are stored as image
//! HDUs: "ANTS", "FREQS" and "TIMES" (1D), "DELAYS" (antenna, time,
//! polarisation), "GAINS" (antenna, time, frequency, polarisation, real/imag)
//! and "FLAGS" (as "GAINS" without the real/imag axis; 1 is flagged).

use std::{
    ffi::{CStr, CString},
    fmt::Display,
    path::Path,
    ptr,
    str::FromStr,
};

use fitsio::{
    errors::check_status as fits_check_status,
    hdu::{DescribesHdu, FitsHdu, HduInfo},
    images::{ImageDescription, ImageType, ReadImage},
    FitsFile,
};
use itertools::Itertools;
use ndarray::prelude::*;

use super::{error::*, CalSolutions, CalType, GainConvention};
use crate::{c64, Pol};

/// Open a fits file.
#[track_caller]
fn fits_open<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    FitsFile::open(file.as_ref()).map_err(|e| {
        let caller = std::panic::Location::caller();
        FitsError::Open {
            fits_error: Box::new(e),
            fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }
    })
}

/// Open a fits file's HDU. If the HDU doesn't exist, `None` is returned.
#[track_caller]
fn fits_open_optional_hdu<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
) -> Result<Option<FitsHdu>, FitsError> {
    match fits_fptr.hdu(hdu_description) {
        Ok(hdu) => Ok(Some(hdu)),
        // Status code 301 means "unavailable".
        Err(fitsio::errors::Error::Fits(fitsio::errors::FitsError { status: 301, .. })) => Ok(None),
        Err(e) => {
            let caller = std::panic::Location::caller();
            Err(FitsError::Fitsio {
                fits_error: Box::new(e),
                fits_filename: fits_fptr.filename.clone().into_boxed_path(),
                hdu_description: format!("{hdu_description}").into_boxed_str(),
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
    }
}

/// Like [`fits_open_optional_hdu`], but the HDU must exist.
#[track_caller]
fn fits_open_hdu<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
) -> Result<FitsHdu, FitsError> {
    fits_fptr.hdu(hdu_description).map_err(|e| {
        let caller = std::panic::Location::caller();
        FitsError::Fitsio {
            fits_error: Box::new(e),
            fits_filename: fits_fptr.filename.clone().into_boxed_path(),
            hdu_description: format!("{hdu_description}").into_boxed_str(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }
    })
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword that may
/// or may not exist, pull out the value of the keyword as a string.
#[track_caller]
fn fits_get_optional_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<String>, FitsError> {
    match hdu.read_key::<String>(fits_fptr, keyword) {
        Ok(value) => Ok(Some(value)),
        Err(fitsio::errors::Error::Fits(fitsio::errors::FitsError {
            status: 202 | 204, ..
        })) => Ok(None),
        Err(e) => {
            let caller = std::panic::Location::caller();
            Err(FitsError::Fitsio {
                fits_error: Box::new(e),
                fits_filename: fits_fptr.filename.clone().into_boxed_path(),
                hdu_description: format!("{}", hdu.number + 1).into_boxed_str(),
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
    }
}

#[track_caller]
fn fits_get_required_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<String, FitsError> {
    match fits_get_optional_key(fits_fptr, hdu, keyword)? {
        Some(value) => Ok(value),
        None => {
            let caller = std::panic::Location::caller();
            Err(FitsError::MissingKey {
                key: keyword.to_string().into_boxed_str(),
                fits_filename: fits_fptr.filename.clone().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
    }
}

/// Pull out a long string keyword (one that may use FITS's CONTINUE
/// mechanism), if it exists.
#[track_caller]
fn fits_get_optional_key_long_string(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<String>, FitsError> {
    let caller = std::panic::Location::caller();
    let long_string_error = |fits_fptr: &FitsFile| FitsError::LongString {
        key: keyword.to_string().into_boxed_str(),
        fits_filename: fits_fptr.filename.clone().into_boxed_path(),
        hdu_num: hdu.number + 1,
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    };
    let keyword_ffi = CString::new(keyword).map_err(|_| long_string_error(fits_fptr))?;

    let mut status = 0;
    let mut long_string_ptr = ptr::null_mut();
    unsafe {
        // ffgkls = fits_read_key_longstr
        fitsio_sys::ffgkls(
            fits_fptr.as_raw(),
            keyword_ffi.as_ptr(),
            &mut long_string_ptr,
            ptr::null_mut(),
            &mut status,
        );
    }
    match status {
        0 => {
            let long_string = unsafe {
                let s = CStr::from_ptr(long_string_ptr)
                    .to_str()
                    .map(|s| s.to_string());
                // Free the cfitsio-allocated string.
                // fffree = fits_free_memory
                fitsio_sys::fffree(long_string_ptr.cast(), &mut 0);
                s
            };
            long_string
                .map(Some)
                .map_err(|_| long_string_error(fits_fptr))
        }
        202 | 204 => Ok(None),
        _ => Err(long_string_error(fits_fptr)),
    }
}

/// Given a FITS file pointer and a HDU, read the associated image.
#[track_caller]
fn fits_get_image<T: ReadImage>(fits_fptr: &mut FitsFile, hdu: &FitsHdu) -> Result<T, FitsError> {
    let caller = std::panic::Location::caller();
    match &hdu.info {
        HduInfo::ImageInfo { .. } => {
            hdu.read_image(fits_fptr)
                .map_err(|e| FitsError::Fitsio {
                    fits_error: Box::new(e),
                    fits_filename: fits_fptr.filename.clone().into_boxed_path(),
                    hdu_description: format!("{}", hdu.number + 1).into_boxed_str(),
                    source_file: caller.file(),
                    source_line: caller.line(),
                    source_column: caller.column(),
                })
        }
        _ => Err(FitsError::NotImage {
            fits_filename: fits_fptr.filename.clone().into_boxed_path(),
            hdu_num: hdu.number + 1,
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }),
    }
}

fn parse_list<T: FromStr>(key: &'static str, value: &str) -> Result<Vec<T>, SolutionsReadError>
where
    T::Err: Display,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|e: T::Err| SolutionsReadError::BadValue {
                key,
                value: value.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, SolutionsReadError>
where
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| SolutionsReadError::BadValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

pub(super) fn read(file: &Path) -> Result<CalSolutions, SolutionsReadError> {
    let mut fptr = fits_open(file)?;
    let hdu = fits_open_hdu(&mut fptr, 0usize)?;

    let pols: Vec<Pol> = parse_list("POLS", &fits_get_required_key(&mut fptr, &hdu, "POLS")?)?;
    let ex_ants: Vec<usize> = match fits_get_optional_key(&mut fptr, &hdu, "EX_ANTS")? {
        Some(s) => parse_list("EX_ANTS", &s)?,
        None => vec![],
    };
    let gain_convention = match fits_get_optional_key(&mut fptr, &hdu, "GAINCONV")? {
        Some(s) => parse_value("GAINCONV", &s)?,
        None => GainConvention::default(),
    };
    let cal_type = match fits_get_optional_key(&mut fptr, &hdu, "CALTYPE")? {
        Some(s) => parse_value("CALTYPE", &s)?,
        None => CalType::default(),
    };
    let calfile = fits_get_optional_key(&mut fptr, &hdu, "CALFILE")?;
    let observer = fits_get_optional_key(&mut fptr, &hdu, "OBSERVER")?;
    let git_origin_cal = fits_get_optional_key_long_string(&mut fptr, &hdu, "GITORIG")?;
    let git_hash_cal = fits_get_optional_key(&mut fptr, &hdu, "GITHASH")?;
    let history = fits_get_optional_key_long_string(&mut fptr, &hdu, "CALHIST")?;

    let hdu = fits_open_hdu(&mut fptr, "ANTS")?;
    let ants: Vec<i32> = fits_get_image(&mut fptr, &hdu)?;
    let ants: Vec<usize> = ants
        .into_iter()
        .map(|a| usize::try_from(a).map_err(|_| SolutionsReadError::BadAntenna(a)))
        .collect::<Result<_, _>>()?;
    let hdu = fits_open_hdu(&mut fptr, "FREQS")?;
    let freqs: Vec<f64> = fits_get_image(&mut fptr, &hdu)?;
    let hdu = fits_open_hdu(&mut fptr, "TIMES")?;
    let times: Vec<f64> = fits_get_image(&mut fptr, &hdu)?;
    let (num_ants, num_times, num_freqs, num_pols) =
        (ants.len(), times.len(), freqs.len(), pols.len());

    let bad_shape = |thing, expected: usize, actual: usize| SolutionsReadError::BadShape {
        thing,
        expected,
        actual,
    };

    let delays = match fits_open_optional_hdu(&mut fptr, "DELAYS")? {
        Some(hdu) => {
            let v: Vec<f64> = fits_get_image(&mut fptr, &hdu)?;
            let actual = v.len();
            Some(
                Array3::from_shape_vec((num_ants, num_times, num_pols), v).map_err(|_| {
                    bad_shape("the DELAYS image", num_ants * num_times * num_pols, actual)
                })?,
            )
        }
        None => None,
    };

    let gains = match fits_open_optional_hdu(&mut fptr, "GAINS")? {
        Some(hdu) => {
            let v: Vec<f64> = fits_get_image(&mut fptr, &hdu)?;
            let expected = num_ants * num_times * num_freqs * num_pols;
            if v.len() != 2 * expected {
                return Err(bad_shape("the GAINS image", 2 * expected, v.len()));
            }
            let complex: Vec<c64> = v
                .chunks_exact(2)
                .map(|pair| c64::new(pair[0], pair[1]))
                .collect();
            Some(
                Array4::from_shape_vec((num_ants, num_times, num_freqs, num_pols), complex)
                    .map_err(|_| bad_shape("the GAINS image", expected, v.len() / 2))?,
            )
        }
        None => None,
    };

    let flags = match fits_open_optional_hdu(&mut fptr, "FLAGS")? {
        Some(hdu) => {
            let v: Vec<i32> = fits_get_image(&mut fptr, &hdu)?;
            let actual = v.len();
            let expected = num_ants * num_times * num_freqs * num_pols;
            Some(
                Array4::from_shape_vec(
                    (num_ants, num_times, num_freqs, num_pols),
                    v.into_iter().map(|f| f != 0).collect(),
                )
                .map_err(|_| bad_shape("the FLAGS image", expected, actual))?,
            )
        }
        None => None,
    };

    Ok(CalSolutions {
        ants,
        pols,
        freqs,
        times,
        delays,
        gains,
        flags,
        ex_ants,
        gain_convention,
        cal_type,
        calfile,
        observer,
        git_origin_cal,
        git_hash_cal,
        history,
    })
}

/// Write a long string keyword with FITS's CONTINUE mechanism. Strings that
/// can't be represented as C strings are skipped.
fn write_long_string_key(
    fptr: &mut FitsFile,
    key: &str,
    value: &str,
    comment: Option<&str>,
) -> Result<(), SolutionsWriteError> {
    let (Ok(key_name), Ok(value)) = (CString::new(key), CString::new(value)) else {
        return Ok(());
    };
    let comment = comment.and_then(|c| CString::new(c).ok());
    let mut status = 0;
    unsafe {
        // ffpkls = fits_write_key_longstr
        fitsio_sys::ffpkls(
            fptr.as_raw(),     /* I - FITS file pointer        */
            key_name.as_ptr(), /* I - name of keyword to write */
            value.as_ptr(),    /* I - keyword value            */
            comment.as_ref().map(|c| c.as_ptr()).unwrap_or(ptr::null()), /* I - keyword comment */
            &mut status, /* IO - error status            */
        );
    }
    fits_check_status(status)?;
    Ok(())
}

fn image_description(data_type: ImageType, dimensions: &[usize]) -> ImageDescription<'_> {
    ImageDescription {
        data_type,
        dimensions,
    }
}

pub(super) fn write(sols: &CalSolutions, file: &Path) -> Result<(), SolutionsWriteError> {
    let ants_i32: Vec<i32> = sols
        .ants
        .iter()
        .map(|&a| i32::try_from(a).map_err(|_| SolutionsWriteError::AntennaTooLarge(a)))
        .collect::<Result<_, _>>()?;
    if file.exists() {
        std::fs::remove_file(file)?;
    }
    let mut fptr = FitsFile::create(file).open()?;
    let hdu = fptr.hdu(0usize)?;

    let CalSolutions {
        ants,
        pols,
        freqs,
        times,
        delays,
        gains,
        flags,
        ex_ants,
        gain_convention,
        cal_type,
        calfile,
        observer,
        git_origin_cal,
        git_hash_cal,
        history,
    } = sols;

    // Signal that we're using long strings.
    let mut status = 0;
    unsafe {
        // ffplsw = fits_write_key_longwarn
        fitsio_sys::ffplsw(
            fptr.as_raw(), /* I - FITS file pointer  */
            &mut status,   /* IO - error status       */
        );
    }
    fits_check_status(status)?;

    hdu.write_key(&mut fptr, "POLS", pols.iter().join(","))?;
    if !ex_ants.is_empty() {
        hdu.write_key(&mut fptr, "EX_ANTS", ex_ants.iter().join(","))?;
    }
    hdu.write_key(&mut fptr, "GAINCONV", gain_convention.to_string())?;
    hdu.write_key(&mut fptr, "CALTYPE", cal_type.to_string())?;
    if let Some(calfile) = calfile {
        hdu.write_key(&mut fptr, "CALFILE", calfile.as_str())?;
    }
    if let Some(observer) = observer {
        hdu.write_key(&mut fptr, "OBSERVER", observer.as_str())?;
    }
    if let Some(git_origin_cal) = git_origin_cal {
        write_long_string_key(
            &mut fptr,
            "GITORIG",
            git_origin_cal,
            Some("git origin of the calibration code"),
        )?;
    }
    if let Some(git_hash_cal) = git_hash_cal {
        hdu.write_key(&mut fptr, "GITHASH", git_hash_cal.as_str())?;
    }
    if let Some(history) = history {
        write_long_string_key(&mut fptr, "CALHIST", history, None)?;
    }
    hdu.write_key(
        &mut fptr,
        "SOFTWARE",
        format!(
            "Created by {} v{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    )?;

    // Write out the current command-line call ("CMDLINE"). If any argument
    // isn't valid UTF-8, don't bother.
    if let Ok(args) = std::env::args_os()
        .map(|a| a.into_string())
        .collect::<Result<Vec<String>, _>>()
    {
        write_long_string_key(
            &mut fptr,
            "CMDLINE",
            &args.join(" "),
            Some("Command-line call"),
        )?;
    }

    let hdu = fptr.create_image("ANTS", &image_description(ImageType::Long, &[ants.len()]))?;
    hdu.write_image(&mut fptr, &ants_i32)?;
    let hdu = fptr.create_image("FREQS", &image_description(ImageType::Double, &[freqs.len()]))?;
    hdu.write_image(&mut fptr, freqs)?;
    let hdu = fptr.create_image("TIMES", &image_description(ImageType::Double, &[times.len()]))?;
    hdu.write_image(&mut fptr, times)?;

    if let Some(delays) = delays {
        let (a, t, p) = delays.dim();
        let hdu = fptr.create_image("DELAYS", &image_description(ImageType::Double, &[a, t, p]))?;
        let v: Vec<f64> = delays.iter().copied().collect();
        hdu.write_image(&mut fptr, &v)?;
    }

    if let Some(gains) = gains {
        // We can't write complex numbers directly to FITS files; instead, we
        // write each real and imag float as individual floats.
        let (a, t, f, p) = gains.dim();
        let hdu = fptr.create_image("GAINS", &image_description(ImageType::Double, &[a, t, f, p, 2]))?;
        let v: Vec<f64> = gains.iter().flat_map(|g| [g.re, g.im]).collect();
        hdu.write_image(&mut fptr, &v)?;
    }

    if let Some(flags) = flags {
        let (a, t, f, p) = flags.dim();
        let hdu = fptr.create_image("FLAGS", &image_description(ImageType::Long, &[a, t, f, p]))?;
        let v: Vec<i32> = flags.iter().map(|&f| i32::from(f)).collect();
        hdu.write_image(&mut fptr, &v)?;
    }

    Ok(())
}
