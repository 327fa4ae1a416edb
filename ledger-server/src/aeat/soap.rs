//! SOAP envelope construction and response parsing
//!
//! The VeriFactu exchange is a fixed, flat SOAP dialect: a
//! `RegFactuSistemaFacturacion` request carrying one `RegistroFactura` per
//! record, answered with a global `EstadoEnvio` plus one `RespuestaLinea`
//! per record. Built and scanned with plain string handling; the parser
//! never fails — an unrecognizable body becomes an unsuccessful response
//! value so nothing can bypass the pipeline's retry logic.

use shared::models::{InvoiceRecord, RecordType};

use super::AeatError;

/// Global verdict of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalStatus {
    Correcto,
    ParcialmenteCorrecto,
    Incorrecto,
}

impl GlobalStatus {
    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Correcto" => Some(GlobalStatus::Correcto),
            "ParcialmenteCorrecto" => Some(GlobalStatus::ParcialmenteCorrecto),
            "Incorrecto" => Some(GlobalStatus::Incorrecto),
            _ => None,
        }
    }
}

/// Per-record verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordResultStatus {
    Correcto,
    AceptadoConErrores,
    Incorrecto,
}

impl RecordResultStatus {
    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Correcto" => Some(RecordResultStatus::Correcto),
            "AceptadoConErrores" => Some(RecordResultStatus::AceptadoConErrores),
            "Incorrecto" => Some(RecordResultStatus::Incorrecto),
            _ => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            RecordResultStatus::Correcto | RecordResultStatus::AceptadoConErrores
        )
    }
}

/// One `RespuestaLinea` of the authority's response.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub invoice_number: String,
    pub status: RecordResultStatus,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Parsed authority response.
///
/// `global_status == None` means the body was a SOAP fault or could not be
/// recognized; the pipeline treats that as a retryable failure.
#[derive(Debug, Clone, Default)]
pub struct AeatResponse {
    pub global_status: Option<GlobalStatus>,
    pub record_results: Vec<RecordOutcome>,
    pub accepted_count: i64,
    pub rejected_count: i64,
    /// Secure verification code issued on acceptance
    pub csv: Option<String>,
    pub error_message: Option<String>,
}

impl AeatResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.global_status, Some(GlobalStatus::Correcto))
    }

    /// A response that carries no usable verdict at all.
    pub fn is_unusable(&self) -> bool {
        self.global_status.is_none()
    }
}

// ============================================================================
// Envelope construction
// ============================================================================

/// Build the SOAP envelope for a batch of records.
///
/// All records in a batch belong to one tenant, so the header issuer is
/// taken from the first record.
pub fn build_soap_envelope(
    records: &[InvoiceRecord],
    software_id: &str,
    software_version: &str,
) -> Result<String, AeatError> {
    let first = records
        .first()
        .ok_or_else(|| AeatError::Validation("Cannot build envelope for empty record set".into()))?;

    let mut body = String::new();
    for record in records {
        body.push_str(&registro_xml(record, software_id, software_version));
    }

    Ok(format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:sum="https://www2.agenciatributaria.gob.es/static_files/common/internet/dep/aplicaciones/es/aeat/tike/cont/ws/SuministroLR.xsd">"#,
            "<soapenv:Header/><soapenv:Body>",
            "<sum:RegFactuSistemaFacturacion>",
            "<sum:Cabecera>",
            "<sum:ObligadoEmision><sum:NombreRazon>{}</sum:NombreRazon><sum:NIF>{}</sum:NIF></sum:ObligadoEmision>",
            "</sum:Cabecera>",
            "{}",
            "</sum:RegFactuSistemaFacturacion>",
            "</soapenv:Body></soapenv:Envelope>"
        ),
        xml_escape(&first.nombre_emisor),
        xml_escape(&first.nif_emisor),
        body,
    ))
}

fn registro_xml(record: &InvoiceRecord, software_id: &str, software_version: &str) -> String {
    let fecha = to_aeat_date(&record.fecha_expedicion);
    let encadenamiento = if record.hash_previous.is_empty() {
        "<sum:Encadenamiento><sum:PrimerRegistro>S</sum:PrimerRegistro></sum:Encadenamiento>".to_string()
    } else {
        format!(
            "<sum:Encadenamiento><sum:RegistroAnterior><sum:Huella>{}</sum:Huella></sum:RegistroAnterior></sum:Encadenamiento>",
            xml_escape(&record.hash_previous)
        )
    };

    let (element, type_fields) = match record.record_type {
        RecordType::Alta => (
            "RegistroAlta",
            format!(
                "<sum:TipoFactura>{}</sum:TipoFactura><sum:CuotaTotal>{}</sum:CuotaTotal><sum:ImporteTotal>{}</sum:ImporteTotal>",
                xml_escape(&record.tipo_factura),
                xml_escape(&record.cuota_tributaria),
                xml_escape(&record.importe_total),
            ),
        ),
        RecordType::Anulacion => ("RegistroAnulacion", String::new()),
    };

    format!(
        concat!(
            "<sum:RegistroFactura><sum:{element}>",
            "<sum:IDFactura>",
            "<sum:IDEmisorFactura>{nif}</sum:IDEmisorFactura>",
            "<sum:NumSerieFactura>{numero}</sum:NumSerieFactura>",
            "<sum:FechaExpedicionFactura>{fecha}</sum:FechaExpedicionFactura>",
            "</sum:IDFactura>",
            "{type_fields}",
            "{encadenamiento}",
            "<sum:SistemaInformatico>",
            "<sum:IdSistemaInformatico>{software_id}</sum:IdSistemaInformatico>",
            "<sum:Version>{software_version}</sum:Version>",
            "</sum:SistemaInformatico>",
            "<sum:TipoHuella>01</sum:TipoHuella>",
            "<sum:Huella>{huella}</sum:Huella>",
            "</sum:{element}></sum:RegistroFactura>"
        ),
        element = element,
        nif = xml_escape(&record.nif_emisor),
        numero = xml_escape(&record.numero_factura),
        fecha = fecha,
        type_fields = type_fields,
        encadenamiento = encadenamiento,
        software_id = xml_escape(software_id),
        software_version = xml_escape(software_version),
        huella = xml_escape(&record.hash_record),
    )
}

/// ISO `YYYY-MM-DD` to the authority's `DD-MM-YYYY`.
fn to_aeat_date(iso: &str) -> String {
    chrono::NaiveDate::parse_from_str(iso, "%Y-%m-%d")
        .map(|d| d.format("%d-%m-%Y").to_string())
        .unwrap_or_else(|_| iso.to_string())
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse the authority's response body.
///
/// Never returns an error: a SOAP fault or an unrecognizable body yields a
/// response with `global_status = None` and a descriptive message.
pub fn parse_aeat_response(raw: &str) -> AeatResponse {
    if let Some(fault) = tag_text(raw, "faultstring") {
        return AeatResponse {
            error_message: Some(format!("SOAP fault: {}", fault.trim())),
            ..Default::default()
        };
    }

    let global_status = tag_text(raw, "EstadoEnvio").and_then(|s| GlobalStatus::parse(&s));
    if global_status.is_none() {
        return AeatResponse {
            error_message: Some("Unrecognizable AEAT response body".to_string()),
            ..Default::default()
        };
    }

    let mut record_results = Vec::new();
    for line in tag_blocks(raw, "RespuestaLinea") {
        let invoice_number = tag_text(&line, "NumSerieFactura")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let Some(status) =
            tag_text(&line, "EstadoRegistro").and_then(|s| RecordResultStatus::parse(&s))
        else {
            continue;
        };
        record_results.push(RecordOutcome {
            invoice_number,
            status,
            code: tag_text(&line, "CodigoErrorRegistro").map(|s| s.trim().to_string()),
            message: tag_text(&line, "DescripcionErrorRegistro").map(|s| s.trim().to_string()),
        });
    }

    let accepted_count = record_results.iter().filter(|r| r.status.is_accepted()).count() as i64;
    let rejected_count = record_results.len() as i64 - accepted_count;

    let error_message = match global_status {
        Some(GlobalStatus::Incorrecto) => Some(
            record_results
                .iter()
                .find_map(|r| r.message.clone())
                .unwrap_or_else(|| "Submission rejected by AEAT".to_string()),
        ),
        _ => None,
    };

    AeatResponse {
        global_status,
        record_results,
        accepted_count,
        rejected_count,
        csv: tag_text(raw, "CSV").map(|s| s.trim().to_string()),
        error_message,
    }
}

/// Text content of the first `<tag>`/`</tag>` pair, ignoring namespace
/// prefixes. Returns `None` for missing or self-closing tags.
fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let (open_end, close_start) = tag_span(xml, tag, 0)?;
    Some(xml[open_end..close_start].to_string())
}

/// All occurrences of a block element's inner content.
fn tag_blocks(xml: &str, tag: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut search_from = 0;
    while let Some((open_end, close_start)) = tag_span(xml, tag, search_from) {
        blocks.push(xml[open_end..close_start].to_string());
        // Resume after the closing tag.
        search_from = close_start + tag.len();
    }
    blocks
}

/// Byte span (content start, content end) of the first `tag` element at or
/// after `from`.
fn tag_span(xml: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let open_end = find_tag_end(xml, tag, from)?;
    let close_start = find_tag_start(xml, tag, open_end)?;
    Some((open_end, close_start))
}

/// Position just after the `>` of the opening `tag`, scanning from `from`.
fn find_tag_end(xml: &str, tag: &str, from: usize) -> Option<usize> {
    let bytes = xml.as_bytes();
    let mut pos = from;
    while let Some(offset) = xml[pos..].find('<') {
        let start = pos + offset + 1;
        if start >= xml.len() {
            return None;
        }
        // Skip closing tags and processing instructions.
        if bytes[start] == b'/' || bytes[start] == b'?' || bytes[start] == b'!' {
            pos = start;
            continue;
        }
        let name_end = xml[start..]
            .find(|c: char| c == '>' || c == ' ' || c == '/')
            .map(|i| start + i)?;
        let qname = &xml[start..name_end];
        let local = qname.rsplit(':').next().unwrap_or(qname);
        if local == tag {
            let gt = xml[name_end..].find('>').map(|i| name_end + i)?;
            // Self-closing tag has no content.
            if xml[name_end..gt].ends_with('/') {
                pos = gt + 1;
                continue;
            }
            return Some(gt + 1);
        }
        pos = name_end;
    }
    None
}

/// Position of the `<` of the closing `tag`, scanning from `from`.
fn find_tag_start(xml: &str, tag: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(offset) = xml[pos..].find("</") {
        let lt = pos + offset;
        let start = lt + 2;
        let name_end = xml[start..]
            .find(|c: char| c == '>' || c == ' ')
            .map(|i| start + i)?;
        let qname = &xml[start..name_end];
        let local = qname.rsplit(':').next().unwrap_or(qname);
        if local == tag {
            return Some(lt);
        }
        pos = name_end;
    }
    None
}
