//! Parameter Injection
//!
//! Routes each call argument into the request builder according to its
//! resolved `ParamConfig`: uploads go to the body unserialized, blank
//! serialized values are skipped, URL params either replace their positional
//! placeholder or land in the query string, and body/header params are added
//! under their configured name.

use crate::config::{Destination, ParamConfig};
use crate::error::RestError;
use crate::http::request::{BodyValue, HttpRequestBuilder};
use crate::serialize::{ParamContext, ParamValue};

/// One argument paired with its configuration and position.
pub struct InjectionContext<'a> {
    pub param: &'a ParamConfig,
    pub index: usize,
    pub value: &'a ParamValue,
}

/// Places one parameter into the request builder.
pub trait ParamInjector: Send + Sync {
    fn inject(
        &self,
        builder: &mut HttpRequestBuilder,
        ctx: &InjectionContext<'_>,
    ) -> Result<(), RestError>;
}

/// The crate's standard injection algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParamInjector;

impl ParamInjector for DefaultParamInjector {
    fn inject(
        &self,
        builder: &mut HttpRequestBuilder,
        ctx: &InjectionContext<'_>,
    ) -> Result<(), RestError> {
        // Null argument: fall back to the configured default, or skip.
        let value = if ctx.value.is_null() {
            match ctx.param.default_value() {
                Some(default) => default,
                None => return Ok(()),
            }
        } else {
            ctx.value
        };

        // Uploads bypass serialization and always land in the body.
        if let ParamValue::Upload(upload) = value {
            return match ctx.param.name() {
                Some(name) => {
                    builder.add_body_param(name, BodyValue::Raw(upload.clone()));
                    Ok(())
                }
                None => {
                    if builder.unnamed_body_occupied() {
                        return Err(RestError::ConfigurationError(
                            "second unnamed body parameter in one call".into(),
                        ));
                    }
                    builder.add_unnamed_body_param(BodyValue::Raw(upload.clone()));
                    Ok(())
                }
            };
        }

        let serialized = ctx.param.serializer().serialize(&ParamContext {
            name: ctx.param.name(),
            index: ctx.index,
            value,
        })?;
        if serialized.trim().is_empty() {
            tracing::trace!(
                target: "restbind::inject",
                index = ctx.index,
                "blank serialized value, skipping param"
            );
            return Ok(());
        }

        match ctx.param.destination() {
            Destination::UrlPath => {
                builder.replace_placeholder_in_uri(ctx.index, &serialized);
            }
            Destination::UrlQuery => match ctx.param.name() {
                Some(name) => {
                    builder.add_query_param_at(ctx.index, name, serialized);
                }
                None => {
                    builder.replace_placeholder_in_uri(ctx.index, &serialized);
                }
            },
            Destination::Body => match ctx.param.name() {
                Some(name) => {
                    builder.add_body_param(name, BodyValue::Text(serialized));
                }
                None => {
                    if builder.unnamed_body_occupied() {
                        return Err(RestError::ConfigurationError(
                            "second unnamed body parameter in one call".into(),
                        ));
                    }
                    builder.add_unnamed_body_param(BodyValue::Text(serialized));
                }
            },
            Destination::Header => {
                // Name presence is enforced at config build time.
                let name = ctx.param.name().ok_or_else(|| {
                    RestError::ConfigurationError("header param requires a name".into())
                })?;
                builder.add_header(name, serialized);
            }
        }
        Ok(())
    }
}
