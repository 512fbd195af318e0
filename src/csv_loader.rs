use std::io::Read;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use csv::{ReaderBuilder, StringRecord};

use crate::types::{CaptureTag, ElementType, FeatureTensor, Sample, TensorData, NUM_FEATURES};

/// Columnas `t_ms,lift,label` de una captura etiquetada
const LABELED_PREFIX: usize = 3;

/// Captura de entrenamiento leída de disco
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledCapture {
    pub tag: CaptureTag,
    pub samples: Vec<Sample>,
}

fn parse_row(record: &StringRecord, row: usize) -> Result<[f32; NUM_FEATURES]> {
    // ax..gz, opcionalmente precedidas de t o de t,lift,label
    let offset = match record.len() {
        n if n == NUM_FEATURES => 0,
        n if n == NUM_FEATURES + 1 => 1,
        n if n == NUM_FEATURES + LABELED_PREFIX => LABELED_PREFIX,
        n => bail!(
            "La fila {} tiene {} columnas (se esperaban {}, {} o {})",
            row,
            n,
            NUM_FEATURES,
            NUM_FEATURES + 1,
            NUM_FEATURES + LABELED_PREFIX
        ),
    };

    let mut values = [0.0f32; NUM_FEATURES];
    for (f, value) in values.iter_mut().enumerate() {
        let field = record[offset + f].trim();
        *value = field
            .parse()
            .with_context(|| format!("Valor {:?} inválido en fila {}, columna {}", field, row, offset + f + 1))?;
    }
    Ok(values)
}

/// Lee muestras IMU en formato `[t,]ax,ay,az,gx,gy,gz` con cabecera.
pub fn load_samples_from_reader<R: Read>(reader: R) -> Result<Vec<Sample>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let mut samples = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Fila {} inválida", row_idx + 1))?;
        samples.push(Sample::from_array(parse_row(&record, row_idx + 1)?));
    }
    Ok(samples)
}

pub fn load_samples_from_csv(path: impl AsRef<Path>) -> Result<Vec<Sample>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;
    let samples =
        load_samples_from_reader(file).with_context(|| format!("CSV {:?} mal formado", path))?;
    ensure!(!samples.is_empty(), "El CSV {:?} no contiene datos", path);
    Ok(samples)
}

/// Lee una captura `t_ms,lift,label,ax..gz`; todas las filas deben llevar
/// la misma etiqueta.
pub fn load_labeled_capture_from_reader<R: Read>(reader: R) -> Result<LabeledCapture> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let mut tag: Option<CaptureTag> = None;
    let mut samples = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.with_context(|| format!("Fila {} inválida", row))?;
        ensure!(
            record.len() == NUM_FEATURES + LABELED_PREFIX,
            "La fila {} no es de una captura etiquetada ({} columnas)",
            row,
            record.len()
        );
        let row_tag = CaptureTag::new(record[1].trim(), record[2].trim())
            .with_context(|| format!("Etiqueta inválida en fila {}", row))?;
        match &tag {
            Some(first) => ensure!(
                *first == row_tag,
                "La fila {} tiene etiqueta {}/{}, la captura es {}/{}",
                row,
                row_tag.lift,
                row_tag.label,
                first.lift,
                first.label
            ),
            None => tag = Some(row_tag),
        }
        samples.push(Sample::from_array(parse_row(&record, row)?));
    }

    let tag = tag.context("La captura no contiene datos")?;
    Ok(LabeledCapture { tag, samples })
}

pub fn load_labeled_capture(path: impl AsRef<Path>) -> Result<LabeledCapture> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;
    load_labeled_capture_from_reader(file).with_context(|| format!("Captura inválida en {:?}", path))
}

/// Tensor de entrada ya normalizado: una fila por paso temporal, seis
/// columnas. Para int8 los valores se leen ya cuantizados.
pub fn load_reference_tensor_from_reader<R: Read>(
    reader: R,
    sequence_length: usize,
    element_type: ElementType,
) -> Result<FeatureTensor> {
    let rows = load_samples_from_reader(reader)?;
    ensure!(
        rows.len() == sequence_length,
        "El tensor de referencia tiene {} filas, se esperaban {}",
        rows.len(),
        sequence_length
    );

    let mut tensor = FeatureTensor::try_zeroed(sequence_length, element_type)
        .context("Sin memoria para el tensor de referencia")?;
    let flat = rows.iter().flat_map(|s| s.to_array());
    match &mut tensor.data {
        TensorData::F32(data) => {
            for (dst, v) in data.iter_mut().zip(flat) {
                *dst = v;
            }
        }
        TensorData::I8(data) => {
            for (idx, (dst, v)) in data.iter_mut().zip(flat).enumerate() {
                ensure!(
                    v.fract() == 0.0 && (i8::MIN as f32..=i8::MAX as f32).contains(&v),
                    "Valor {} en posición {} no es un int8",
                    v,
                    idx
                );
                *dst = v as i8;
            }
        }
    }
    Ok(tensor)
}

pub fn load_reference_tensor(
    path: impl AsRef<Path>,
    sequence_length: usize,
    element_type: ElementType,
) -> Result<FeatureTensor> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;
    load_reference_tensor_from_reader(file, sequence_length, element_type)
        .with_context(|| format!("Tensor de referencia inválido en {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_samples_with_time_column() {
        let csv = "t,ax,ay,az,gx,gy,gz\n0,1.0,2.0,3.0,4.0,5.0,6.0\n5, -1.5,0,0,0,0,9.81\n";
        let samples = load_samples_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], Sample::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0));
        assert_eq!(samples[1].ax, -1.5);
        assert_eq!(samples[1].gz, 9.81);
    }

    #[test]
    fn test_load_samples_without_time_column() {
        let csv = "ax,ay,az,gx,gy,gz\n1,1,1,2,2,2\n";
        let samples = load_samples_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(samples, vec![Sample::new(1.0, 1.0, 1.0, 2.0, 2.0, 2.0)]);
    }

    #[test]
    fn test_rejects_bad_rows() {
        let short = "a,b,c\n1,2,3\n";
        assert!(load_samples_from_reader(short.as_bytes()).is_err());
        let garbage = "ax,ay,az,gx,gy,gz\n1,2,x,4,5,6\n";
        assert!(load_samples_from_reader(garbage.as_bytes()).is_err());
    }

    #[test]
    fn test_reference_tensor_int8() {
        let csv = "ax,ay,az,gx,gy,gz\n-128,0,127,1,2,3\n5,5,5,5,5,5\n";
        let tensor =
            load_reference_tensor_from_reader(csv.as_bytes(), 2, ElementType::Int8).unwrap();
        assert_eq!(tensor.shape, [1, 2, NUM_FEATURES]);
        assert_eq!(tensor.get(0, 0), -128.0);
        assert_eq!(tensor.get(0, 2), 127.0);
        assert_eq!(tensor.get(1, 5), 5.0);

        let wrong_len = load_reference_tensor_from_reader(csv.as_bytes(), 3, ElementType::Int8);
        assert!(wrong_len.is_err());
        let not_int = "ax,ay,az,gx,gy,gz\n0.5,0,0,0,0,0\n";
        assert!(load_reference_tensor_from_reader(not_int.as_bytes(), 1, ElementType::Int8).is_err());
    }

    #[test]
    fn test_labeled_capture_rejects_mixed_tags() {
        let csv = "t_ms,lift,label,ax,ay,az,gx,gy,gz\n0,bP,p_f,1,2,3,4,5,6\n5,bP,o_a,1,2,3,4,5,6\n";
        assert!(load_labeled_capture_from_reader(csv.as_bytes()).is_err());
        let unknown = "t_ms,lift,label,ax,ay,az,gx,gy,gz\n0,squat,p_f,1,2,3,4,5,6\n";
        assert!(load_labeled_capture_from_reader(unknown.as_bytes()).is_err());
        let empty = "t_ms,lift,label,ax,ay,az,gx,gy,gz\n";
        assert!(load_labeled_capture_from_reader(empty.as_bytes()).is_err());
    }
}
